#![deny(missing_docs)]
//! # NMEA GPS monitor
//! Streams fixes, satellites in view and receiver text messages to the terminal,
//! optionally saving every raw sentence to disk.
mod config;
mod store;
use chrono::Utc;
use crossterm::terminal;
use nmea_gps::NmeaGps;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use tracing_subscriber::EnvFilter;

pub use config::MonitorCfg;
use store::SentenceLog;

/// How often raw sentences are moved out of the engine's queue
const RAW_DRAIN: Duration = Duration::from_millis(100);

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: MonitorCfg = argh::from_env();
    let cfg = if args.default {
        match MonitorCfg::load_default() {
            Ok(cfg) => MonitorCfg {
                replay: args.replay,
                ..cfg
            },
            Err(e) => {
                log::error!("Could not load the default configuration: {e}");
                return;
            }
        }
    } else {
        args
    };
    if cfg.store {
        if let Err(e) = cfg.store_default() {
            log::warn!("Could not store the configuration: {e}");
        }
    }

    let gps = match cfg.open() {
        Ok(gps) => gps,
        Err(e) => {
            log::error!("Could not open the receiver: {e}");
            return;
        }
    };

    let mut sentence_log = match &cfg.save_dir {
        Some(dir) => match SentenceLog::new(dir.clone(), true) {
            Ok(store) => Some(store),
            Err(e) => {
                log::error!("Could not create {dir:?}: {e}");
                return;
            }
        },
        None => None,
    };

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        if let Err(e) = ctrlc::set_handler(move || running.store(false, Ordering::Relaxed)) {
            log::warn!("Could not install the Ctrl-C handler: {e}");
        }
    }

    gps.parse_start();
    let interval = Duration::from_millis(cfg.interval.max(10));
    let mut last_refresh = Instant::now();
    while running.load(Ordering::Relaxed) {
        thread::sleep(RAW_DRAIN.min(interval));
        record(&gps, sentence_log.as_mut());
        if last_refresh.elapsed() >= interval {
            last_refresh = Instant::now();
            show(&gps, &cfg);
        }
    }
    gps.parse_stop();
    log::info!("Stopped");
}

fn record(gps: &NmeaGps, sentence_log: Option<&mut SentenceLog>) {
    let Some(store) = sentence_log else {
        while gps.raw_sentence_queue_size() > 0 {
            log::trace!("{}", gps.get_raw_sentence());
        }
        return;
    };
    if let Err(e) = store.drain(gps, Utc::now()) {
        log::warn!("Could not save sentences: {e}");
    }
}

fn show(gps: &NmeaGps, cfg: &MonitorCfg) {
    let now = Utc::now();
    while gps.txt_message_queue_size() > 0 {
        let msg = gps.get_txt_message();
        if cfg.json {
            match serde_json::to_string(&msg) {
                Ok(line) => println!("{line}"),
                Err(e) => log::warn!("Could not serialize {msg}: {e}"),
            }
        } else {
            println!("{msg}");
        }
    }
    while gps.fix_queue_size() > 0 {
        let fix = gps.get_fix();
        if cfg.json {
            match serde_json::to_string(&fix) {
                Ok(line) => println!("{line}"),
                Err(e) => log::warn!("Could not serialize fix: {e}"),
            }
        } else {
            println!("{fix}");
        }
    }
    if cfg.json {
        return;
    }
    let width = terminal::size().map(|(w, _)| w as usize).unwrap_or(80);
    let sats = gps.satellites();
    println!(
        "{:-<width$}",
        format!(
            "{} [{} sats, {:.1} sentences/s, {:.0} B/s] ",
            now.format("%Y-%m-%d %H:%M:%S%Z"),
            sats.len(),
            gps.sentences_per_second(),
            gps.bytes_per_second()
        ),
    );
    for sat in sats {
        println!("\t{sat}");
    }
    println!("{:=<width$}", "");
}
