//! Process-wide structured logging.
//!
//! One `CoreLogger` is installed per process (the controller, and separately each worker
//! subprocess). It writes timestamped, component-tagged lines to a file under the temp root,
//! mirroring the format string the original Python implementation passed to
//! `logging.basicConfig` (`%(asctime)s %(filename)s:%(lineno)s %(funcName)s() [id=...] %(message)s`).
//!
//! Configuring *where* a production deployment ships these lines (log aggregation, verbosity
//! flags surfaced to end users) is out of scope; the mechanism for emitting them is not.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use log::{LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;

pub struct CoreLogger {
    sink: Mutex<File>,
    /// Short id of the process writing through this logger (a worker's hex id, or "controller").
    component: String,
}

impl CoreLogger {
    fn new(sink: File, component: String) -> CoreLogger {
        CoreLogger {
            sink: Mutex::new(sink),
            component,
        }
    }
}

impl Log for CoreLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let target = record.target();
        let line = format!(
            "{now} {level} {target} [{component}] {args}\n",
            level = record.level(),
            component = self.component,
            args = record.args(),
        );

        let mut sink = self.sink.lock();
        // Best-effort: a logging failure must never take down the process it is observing.
        let _ = sink.write_all(line.as_bytes());
        let _ = sink.flush();
    }

    fn flush(&self) {
        let _ = self.sink.lock().flush();
    }
}

/// Installs a `CoreLogger` writing to `log_path`, tagging every line with `component`
/// (e.g. a worker's hex id, or `"controller"`), at the given max level.
///
/// Idempotent: a second call from the same process is a harmless no-op (matching the teacher's
/// `set_logger` handling, which tolerates being called more than once in tests).
pub fn init(log_path: &Path, component: impl Into<String>, max_level: LevelFilter) -> Result<(), String> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|e| format!("failed to open log file {log_path:?}: {e}"))?;

    let logger = Box::new(CoreLogger::new(file, component.into()));
    log::set_max_level(max_level);
    if log::set_logger(Box::leak(logger)).is_err() {
        log::debug!("logging already initialized");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn writes_formatted_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debug.log");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .unwrap();
        let logger = CoreLogger::new(file, "test-worker".to_string());

        let record = Record::builder()
            .args(format_args!("hello {}", 1))
            .level(log::Level::Info)
            .target("worker::dispatch")
            .build();
        logger.log(&record);

        let mut contents = String::new();
        File::open(&path)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert!(contents.contains("hello 1"));
        assert!(contents.contains("test-worker"));
        assert!(contents.contains("worker::dispatch"));
    }
}
