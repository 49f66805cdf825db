use chrono::Local;
use fern::Dispatch;
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;
use std::env;

/// Detail level of the log system.
/// Controlled by the `SEMCHECK_LOG` environment variable; defaults to `Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Error,
    Info,
    Debug,
    Trace,
}

impl Verbosity {
    pub fn from_env() -> Self {
        match env::var("SEMCHECK_LOG").ok().as_deref() {
            Some("error") => Verbosity::Error,
            Some("debug") => Verbosity::Debug,
            Some("trace") => Verbosity::Trace,
            _ => Verbosity::Info,
        }
    }

    fn level_filter(self) -> LevelFilter {
        match self {
            Verbosity::Error => LevelFilter::Error,
            Verbosity::Info => LevelFilter::Info,
            Verbosity::Debug => LevelFilter::Debug,
            Verbosity::Trace => LevelFilter::Trace,
        }
    }
}

/// Init the log system with the verbosity taken from `SEMCHECK_LOG`.
pub fn init_log() -> Result<(), fern::InitError> {
    init_log_with(Verbosity::from_env())
}

pub fn init_log_with(verbosity: Verbosity) -> Result<(), fern::InitError> {
    let colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Cyan)
        .trace(Color::BrightBlack);

    Dispatch::new()
        .level(verbosity.level_filter())
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{}|{}|{}|: {}",
                Local::now().format("%H:%M:%S"),
                record.target(),
                colors.color(record.level()),
                message
            ))
        })
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}

#[macro_export]
macro_rules! semcheck_error {
    ($($arg:tt)+) => (
        ::log::error!(target: "SemCheck", $($arg)+)
    );
}

#[macro_export]
macro_rules! semcheck_info {
    ($($arg:tt)+) => (
        ::log::info!(target: "SemCheck", $($arg)+)
    );
}

#[macro_export]
macro_rules! semcheck_debug {
    ($($arg:tt)+) => (
        ::log::debug!(target: "SemCheck", $($arg)+)
    );
}

#[macro_export]
macro_rules! semcheck_trace {
    ($($arg:tt)+) => (
        ::log::trace!(target: "SemCheck", $($arg)+)
    );
}
