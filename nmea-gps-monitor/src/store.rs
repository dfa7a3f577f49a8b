use std::{
    ffi::OsStr,
    fs::{remove_dir_all, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::mpsc,
    thread,
};

use chrono::{DateTime, Utc};
use flate2::{write::GzEncoder, Compression};
use nmea_gps::NmeaGps;

/// Appends raw NMEA sentences to one file per hour, `<root>/YYYYMMDD/YYYYMMDDHH0000.nmea`.
///
/// When the date rolls over the finished day directory is packed into
/// `YYYYMMDD.tar.gz` on a background thread and removed.
#[derive(Debug)]
pub struct SentenceLog {
    root_dir: PathBuf,
    current_dir: Option<PathBuf>,
    last_date: Option<String>,
    last_hour: Option<String>,
    writer: Option<File>,
    compress_tx: Option<mpsc::Sender<PathBuf>>,
    compress_hdl: Option<thread::JoinHandle<()>>,
}

impl SentenceLog {
    /// Log under `root_dir`, optionally compressing finished days.
    pub fn new(root_dir: PathBuf, compress: bool) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root_dir)?;
        let (compress_tx, compress_hdl) = if compress {
            let (tx, rx) = mpsc::channel::<PathBuf>();
            let hdl = thread::Builder::new()
                .name("nmea-compress".into())
                .spawn(move || {
                    log::debug!("Compression thread started");
                    while let Ok(dir) = rx.recv() {
                        compress_dir(&dir);
                    }
                    log::debug!("Compression thread exiting");
                })?;
            (Some(tx), Some(hdl))
        } else {
            (None, None)
        };
        Ok(Self {
            root_dir,
            current_dir: None,
            last_date: None,
            last_hour: None,
            writer: None,
            compress_tx,
            compress_hdl,
        })
    }

    /// Append `sentence` and a CRLF to the file for the hour of `tstamp`.
    pub fn store(&mut self, tstamp: DateTime<Utc>, sentence: &str) -> Result<(), std::io::Error> {
        let date = tstamp.format("%Y%m%d").to_string();
        let hour = tstamp.format("%H").to_string();
        if self.last_date.as_deref() != Some(&date) {
            let next = self.root_dir.join(&date);
            std::fs::create_dir_all(&next)?;
            if let Some(done) = self.current_dir.replace(next) {
                // close the file before the directory is packed
                self.writer = None;
                if let Some(tx) = &self.compress_tx {
                    let _ = tx.send(done);
                }
            }
            self.last_date = Some(date.clone());
            self.last_hour = None;
        }
        if self.last_hour.as_deref() != Some(&hour) {
            let dir = self.current_dir.as_deref().unwrap_or(&self.root_dir);
            let filename = dir.join(format!("{date}{hour}0000.nmea"));
            self.writer = Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(filename)?,
            );
            self.last_hour = Some(hour);
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "No file writer",
            ));
        };
        writer.write_all(sentence.as_bytes())?;
        writer.write_all(b"\r\n")?;
        writer.flush()
    }

    /// Move every queued raw sentence of `gps` into the log, returning how many were stored.
    pub fn drain(&mut self, gps: &NmeaGps, tstamp: DateTime<Utc>) -> Result<usize, std::io::Error> {
        let mut stored = 0;
        while gps.raw_sentence_queue_size() > 0 {
            self.store(tstamp, &gps.get_raw_sentence())?;
            stored += 1;
        }
        Ok(stored)
    }
}

impl Drop for SentenceLog {
    fn drop(&mut self) {
        // hang up so the thread drains its queue and exits
        self.compress_tx = None;
        if let Some(hdl) = self.compress_hdl.take() {
            let _ = hdl.join();
        }
    }
}

fn compress_dir(dir: &Path) {
    let mut outfile = dir.to_path_buf();
    outfile.set_extension("tar.gz");
    log::info!("Compressing {dir:?} to {outfile:?}...");
    let file = match File::create(&outfile) {
        Ok(file) => file,
        Err(e) => {
            log::warn!("Could not create {outfile:?}: {e:?}");
            return;
        }
    };
    let mut tar = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    let root = dir.file_name().unwrap_or(OsStr::new("."));
    let res = tar
        .append_dir_all(root, dir)
        .and_then(|_| tar.into_inner())
        .and_then(|gz| gz.finish())
        .map(|_| ());
    match res {
        Ok(_) => {
            if let Err(e) = remove_dir_all(dir) {
                log::warn!("Error deleting directory {dir:?}: {e:?}");
            } else {
                log::info!("Compression successful! Deleted {dir:?}");
            }
        }
        Err(e) => log::warn!("Compression error {e:?}: {dir:?}"),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::MonitorCfg;
    use argh::FromArgs;
    use chrono::TimeZone;
    use std::time::{Duration, Instant};

    #[test]
    fn hourly_files() {
        let root = tempfile::tempdir().unwrap();
        let mut log = SentenceLog::new(root.path().to_path_buf(), false).unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 7, 12, 17, 59, 59).unwrap();
        log.store(t0, "$GPTXT,01,01,02,ANTSTATUS=OK*3B").unwrap();
        log.store(t0, "$GPTXT,01,01,02,ANTSTATUS=OK*3B").unwrap();
        log.store(t0 + chrono::Duration::seconds(1), "$GPTXT,01,01,02,ANTSTATUS=OK*3B")
            .unwrap();
        let day = root.path().join("20240712");
        let first = std::fs::read_to_string(day.join("20240712170000.nmea")).unwrap();
        assert_eq!(first.lines().count(), 2);
        assert!(first.ends_with("*3B\r\n"));
        assert!(day.join("20240712180000.nmea").exists());
    }

    #[test]
    fn finished_days_are_compressed() {
        let root = tempfile::tempdir().unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 7, 12, 23, 0, 0).unwrap();
        {
            let mut log = SentenceLog::new(root.path().to_path_buf(), true).unwrap();
            log.store(t0, "$GPGLL,4916.45,N,12311.12,W,225444,A*31").unwrap();
            log.store(t0 + chrono::Duration::hours(2), "$GPGLL,4916.45,N,12311.12,W,225444,A*31")
                .unwrap();
        }
        // dropping the log waits for the compression thread
        assert!(root.path().join("20240712.tar.gz").exists());
        assert!(!root.path().join("20240712").exists());
        assert!(root.path().join("20240713").join("20240713010000.nmea").exists());
    }

    #[test]
    fn replay_is_recorded_without_loss() {
        let root = tempfile::tempdir().unwrap();
        let capture = root.path().join("capture.nmea");
        let sentences: Vec<String> = (0..40)
            .map(|i| nmea_gps::append_checksum(&format!("GPTXT,01,01,02,line {i:02}")))
            .collect();
        let stream: String = sentences.iter().map(|s| format!("{s}\r\n")).collect();
        std::fs::write(&capture, stream).unwrap();
        let save_dir = root.path().join("raw");
        let cfg = MonitorCfg::from_args(
            &["nmea-gps-monitor"],
            &[
                "--replay",
                capture.to_str().unwrap(),
                "--save-dir",
                save_dir.to_str().unwrap(),
            ],
        )
        .expect("valid arguments");
        let gps = cfg.open().unwrap();
        let mut log = SentenceLog::new(save_dir.clone(), false).unwrap();
        let tstamp = Utc.with_ymd_and_hms(2024, 7, 12, 17, 0, 0).unwrap();

        gps.parse_start();
        let start = Instant::now();
        let mut stored = 0;
        while stored < sentences.len() && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(20));
            stored += log.drain(&gps, tstamp).unwrap();
        }
        gps.parse_stop();

        let saved =
            std::fs::read_to_string(save_dir.join("20240712").join("20240712170000.nmea")).unwrap();
        assert_eq!(saved.lines().collect::<Vec<_>>(), sentences);
    }
}
