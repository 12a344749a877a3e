//! Timestamped event logging.
//!
//! Events render as `MM/DD/YYYY<TAB>HH:MM:SS<TAB>SEVERITY<TAB>message` and
//! are mirrored to the console and/or appended to a dated file
//! (`<dir>/YYYYMM.txt`). The crate logs through the standard `log` macros;
//! `error!`, `warn!` and `info!` map to the ERROR, WARNING and STATUS
//! severities, with [`success`] and [`failure`] covering the remaining two.

use chrono::Local;
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

const SUCCESS_TARGET: &str = "rivet::event::success";
const FAILURE_TARGET: &str = "rivet::event::failure";

struct EventLogger {
    console: bool,
    log_dir: Option<PathBuf>,
}

impl EventLogger {
    fn severity(record: &Record) -> &'static str {
        match record.target() {
            SUCCESS_TARGET => "SUCCESS",
            FAILURE_TARGET => "FAILURE",
            _ => match record.level() {
                Level::Error => "ERROR",
                Level::Warn => "WARNING",
                _ => "STATUS",
            },
        }
    }
}

impl Log for EventLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let now = Local::now();
        let line = format!(
            "{}\t{}\t{}",
            now.format("%m/%d/%Y\t%H:%M:%S"),
            Self::severity(record),
            record.args()
        );
        if self.console {
            println!("{}", line);
        }
        if let Some(dir) = &self.log_dir {
            let path = dir.join(format!("{}.txt", now.format("%Y%m")));
            // one open/append per event; a lost log line never fails the run
            if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
                let _ = writeln!(file, "{}", line);
            }
        }
    }

    fn flush(&self) {}
}

/// Install the event logger. `console` mirrors events to stdout; `log_dir`
/// appends them to a dated file in that directory.
pub fn init(console: bool, log_dir: Option<PathBuf>) -> Result<(), log::SetLoggerError> {
    log::set_boxed_logger(Box::new(EventLogger { console, log_dir }))?;
    log::set_max_level(LevelFilter::Info);
    Ok(())
}

/// Record a SUCCESS event.
pub fn success(message: &str) {
    log::info!(target: SUCCESS_TARGET, "{}", message);
}

/// Record a FAILURE event.
pub fn failure(message: &str) {
    log::error!(target: FAILURE_TARGET, "{}", message);
}
