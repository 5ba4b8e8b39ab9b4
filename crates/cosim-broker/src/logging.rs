//! Broker logging
//!
//! Integer-levelled logging with three sinks: the console (through
//! `tracing`), an optional log file, and an optional user-installed
//! callback. Installing a callback halts the file sink; removing it resumes
//! file logging. Messages above the configured maximum level are dropped at
//! the source. The logger is internally synchronised and safe to share.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

use cosim_core::config::{log_level, LoggingConfig};
use cosim_core::CoreResult;

/// User-installed log sink: `(level, name, message)`.
pub type LogCallback = Box<dyn Fn(i32, &str, &str) + Send + Sync>;

struct LoggerInner {
    console_level: i32,
    file_level: i32,
    file: Option<BufWriter<File>>,
    callback: Option<LogCallback>,
    file_halted: bool,
}

/// The broker's log sink triage.
pub struct Logger {
    inner: Mutex<LoggerInner>,
    max_level: AtomicI32,
}

impl Logger {
    pub fn new(config: &LoggingConfig) -> CoreResult<Self> {
        let logger = Self {
            inner: Mutex::new(LoggerInner {
                console_level: config.console_level,
                file_level: config.file_level,
                file: None,
                callback: None,
                file_halted: false,
            }),
            max_level: AtomicI32::new(config.max_level()),
        };
        if let Some(path) = &config.file_path {
            logger.open_file(path)?;
        }
        Ok(logger)
    }

    /// Open (appending) the file sink.
    pub fn open_file(&self, path: &Path) -> CoreResult<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        self.lock().file = Some(BufWriter::new(file));
        Ok(())
    }

    /// Messages above this level are dropped.
    pub fn max_level(&self) -> i32 {
        self.max_level.load(Ordering::Relaxed)
    }

    /// Update both sink levels and recompute the maximum.
    pub fn set_log_levels(&self, console_level: i32, file_level: i32) {
        let mut inner = self.lock();
        inner.console_level = console_level;
        inner.file_level = file_level;
        self.max_level
            .store(console_level.max(file_level), Ordering::Relaxed);
    }

    /// Install or remove the user callback. An installed callback takes
    /// precedence over every built-in sink and halts file logging.
    pub fn set_callback(&self, callback: Option<LogCallback>) {
        let mut inner = self.lock();
        inner.file_halted = callback.is_some();
        inner.callback = callback;
    }

    /// Emit one message. `name` identifies the originating node; the file
    /// sink records `name::message`.
    pub fn log(&self, level: i32, name: &str, message: &str) {
        if level > self.max_level() {
            return;
        }
        let mut inner = self.lock();
        if let Some(callback) = &inner.callback {
            callback(level, name, message);
            return;
        }
        if level <= inner.console_level {
            emit_console(level, name, message);
        }
        if level <= inner.file_level && !inner.file_halted {
            if let Some(file) = &mut inner.file {
                // file write failures must never take down the dispatcher
                let _ = writeln!(file, "{name}::{message}");
            }
        }
    }

    pub fn flush(&self) {
        if let Some(file) = &mut self.lock().file {
            let _ = file.flush();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LoggerInner> {
        self.inner.lock().expect("logger lock poisoned")
    }
}

fn emit_console(level: i32, name: &str, message: &str) {
    match level {
        i32::MIN..=log_level::ERROR => tracing::error!("{name}::{message}"),
        log_level::WARNING => tracing::warn!("{name}::{message}"),
        log_level::SUMMARY..=log_level::INTERFACES => tracing::info!("{name}::{message}"),
        log_level::TIMING..=log_level::DATA => tracing::debug!("{name}::{message}"),
        _ => tracing::trace!("{name}::{message}"),
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("max_level", &self.max_level())
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn capturing_logger(max: i32) -> (Arc<Logger>, Arc<Mutex<Vec<(i32, String)>>>) {
        let config = LoggingConfig {
            console_level: max,
            file_level: max,
            ..LoggingConfig::default()
        };
        let logger = Arc::new(Logger::new(&config).unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        logger.set_callback(Some(Box::new(move |level, _name, message| {
            sink.lock().unwrap().push((level, message.to_string()));
        })));
        (logger, seen)
    }

    #[test]
    fn test_levels_above_max_are_dropped() {
        let (logger, seen) = capturing_logger(log_level::SUMMARY);
        logger.log(log_level::ERROR, "n", "kept");
        logger.log(log_level::TRACE, "n", "dropped");
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, "kept");
    }

    #[test]
    fn test_dump_level_always_passes() {
        let (logger, seen) = capturing_logger(log_level::NO_PRINT);
        logger.log(log_level::DUMP, "n", "|| dl cmd:Stop from 0 to 0");
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_set_log_levels_recomputes_max() {
        let config = LoggingConfig::default();
        let logger = Logger::new(&config).unwrap();
        logger.set_log_levels(log_level::SUMMARY, log_level::DATA);
        assert_eq!(logger.max_level(), log_level::DATA);
    }

    #[test]
    fn test_file_sink() {
        let dir = std::env::temp_dir().join(format!("cosim-log-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("broker.log");

        let config = LoggingConfig {
            console_level: log_level::NO_PRINT,
            file_level: log_level::SUMMARY,
            file_path: Some(path.clone()),
            ..LoggingConfig::default()
        };
        let logger = Logger::new(&config).unwrap();
        logger.log(log_level::SUMMARY, "broker1", "started");
        logger.flush();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("broker1::started"));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
