use std::path::PathBuf;

use argh::FromArgs;
use directories::ProjectDirs;
use nmea_gps::{EnablePin, NmeaGps, ReplayTransport, MAX_QUEUE_DEPTH};
use serde::{Deserialize, Serialize};

#[derive(FromArgs, Serialize, Deserialize, Debug, Clone, PartialEq)]
/// Stream fixes, satellites and receiver messages from an NMEA GPS
pub struct MonitorCfg {
    /// serial device; ignored when --i2c-bus is given
    #[argh(positional, default = "String::from(\"/dev/ttyUSB0\")")]
    pub device: String,
    /// baud rate
    #[argh(option, default = "9600")]
    pub baud_rate: u32,
    /// open the n-th serial port the system reports instead of the device path
    #[argh(option)]
    pub uart: Option<usize>,
    /// read a u-blox receiver on this I2C bus instead of a serial device
    #[argh(option)]
    pub i2c_bus: Option<u8>,
    /// I2C address of the receiver
    #[argh(option, default = "0x42")]
    pub i2c_address: u8,
    /// GPIO chip of the receiver's enable line
    #[argh(option, default = "String::from(\"/dev/gpiochip0\")")]
    pub enable_chip: String,
    /// line offset of the receiver's enable line
    #[argh(option)]
    pub enable_line: Option<u32>,
    /// depth of the fix, text and raw sentence queues; raised to the maximum
    /// while saving or replaying
    #[argh(option, default = "nmea_gps::DEFAULT_QUEUE_DEPTH")]
    pub queue_depth: usize,
    /// milliseconds between screen updates
    #[argh(option, default = "1000")]
    pub interval: u64,
    /// print fixes and messages as JSON lines
    #[argh(switch)]
    pub json: bool,
    /// append raw sentences to hourly files in this directory
    #[argh(option)]
    pub save_dir: Option<PathBuf>,
    /// remember this configuration as the default
    #[argh(switch)]
    #[serde(skip)]
    pub store: bool,
    /// ignore the other options and use the stored default configuration
    #[argh(switch)]
    #[serde(skip)]
    pub default: bool,
    /// replay a recorded NMEA file instead of opening a device
    #[argh(option)]
    #[serde(skip)]
    pub replay: Option<PathBuf>,
}

impl MonitorCfg {
    /// The enable line, if one was configured
    pub fn enable_pin(&self) -> Option<EnablePin> {
        self.enable_line.map(|line| EnablePin {
            chip: self.enable_chip.clone(),
            line,
        })
    }

    /// Queue depth to run with. Recording must not lose raw sentences
    /// between drains, so saving or replaying uses the deepest queue.
    pub fn effective_queue_depth(&self) -> usize {
        if self.save_dir.is_some() || self.replay.is_some() {
            MAX_QUEUE_DEPTH
        } else {
            self.queue_depth
        }
    }

    /// Open the receiver described by this configuration
    pub fn open(&self) -> nmea_gps::Result<NmeaGps> {
        let gps = if let Some(path) = &self.replay {
            let file = std::fs::File::open(path)?;
            NmeaGps::with_transport(ReplayTransport::new(std::io::BufReader::new(file)))
        } else if let Some(bus) = self.i2c_bus {
            NmeaGps::i2c(bus, self.i2c_address)?
        } else if let Some(index) = self.uart {
            NmeaGps::uart(index, self.baud_rate, self.enable_pin())?
        } else if let Some(pin) = self.enable_pin() {
            let mut uart = nmea_gps::UartTransport::open(&self.device, self.baud_rate)?;
            uart.attach_enable_pin(&pin)?;
            NmeaGps::with_transport(uart)
        } else {
            NmeaGps::open(&self.device, self.baud_rate)?
        };
        gps.set_max_queue_depth(self.effective_queue_depth());
        Ok(gps)
    }

    /// Store the configuration in the default location
    pub fn store_default(&self) -> Result<(), std::io::Error> {
        let mut path = get_default_path();
        std::fs::create_dir_all(&path)?;
        path.push("config.json");
        self.store_to(&path)
    }

    /// Load the configuration from the default location
    pub fn load_default() -> Result<Self, std::io::Error> {
        let mut path = get_default_path();
        path.push("config.json");
        Self::load_from(&path)
    }

    fn store_to(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        std::fs::write(
            path,
            serde_json::to_string_pretty(self)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?,
        )
    }

    fn load_from(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let data = std::fs::read(path)?;
        serde_json::from_slice(&data).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    }
}

fn get_default_path() -> PathBuf {
    if let Some(path) = ProjectDirs::from("", "", "nmea_gps_monitor") {
        path.config_dir().to_path_buf()
    } else {
        PathBuf::from(".")
    }
}
