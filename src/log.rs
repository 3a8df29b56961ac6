//! Logging utilities for applications embedding the library.
//!
//! The library itself logs through the [`log`] facade; [`init()`] routes the
//! facade into a JSON [`slog`] logger.

use std::{env, fmt, io};

use chrono::Local;
use slog::{
    o, Drain, Duplicate, FilterLevel, FnValue, Fuse, Level, Logger,
    PushFnValue, Record,
};
use slog_async::Async;
use slog_envlogger::LogBuilder;
use slog_json::Json;
use slog_scope::GlobalLoggerGuard;

use crate::conf;

/// Guards of the global logger installed by [`init()`].
///
/// Logging stops once it's dropped.
pub struct LoggerGuard {
    _scope: GlobalLoggerGuard,
}

impl fmt::Debug for LoggerGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LoggerGuard")
    }
}

/// Installs a [`new_dual_logger()`] writing to STDOUT and STDERR as the
/// global logger and routes the [`log`] facade into it.
///
/// # Errors
///
/// If the [`log`] facade already has a logger set.
pub fn init(conf: &conf::Log) -> Result<LoggerGuard, ::log::SetLoggerError> {
    let level = conf.level();
    let logger = new_dual_logger(io::stdout(), io::stderr(), level);
    let scope = slog_scope::set_global_logger(logger);
    slog_stdlog::init_with_level(
        level.map_or(::log::Level::Error, facade_level),
    )?;
    if level.is_none() {
        ::log::set_max_level(::log::LevelFilter::Off);
    }
    Ok(LoggerGuard { _scope: scope })
}

/// Builds JSON [`Logger`] which prints all its log records to `w_out` writer,
/// but WARN level (and higher) to `w_err` writer. Logger will use [`Async`]
/// drain with channel size of 2048 entries.
///
/// Records above the provided `level` are dropped (everything is dropped if
/// it's `None`), unless `RUST_LOG` environment variable specifies filtering
/// directives.
///
/// Created [`Logger`] produces log records with `fqn`, `lvl`, `time` and `msg`
/// fields by default.
pub fn new_dual_logger<W1, W2>(
    w_out: W1,
    w_err: W2,
    level: Option<Level>,
) -> Logger
where
    W1: io::Write + Send + 'static,
    W2: io::Write + Send + 'static,
{
    let drain_out = Json::new(w_out).build();
    let drain_err = Json::new(w_err).build();
    let drain = Duplicate(
        drain_out.filter(|r| !r.level().is_at_least(Level::Warning)),
        drain_err.filter_level(Level::Warning),
    )
    .map(Fuse);
    let builder = LogBuilder::new(drain);
    let drain = match env::var("RUST_LOG") {
        Ok(directives) => builder.parse(&directives),
        Err(_) => builder.filter(None, filter_level(level)),
    }
    .build()
    .fuse();
    let drain = Async::new(drain).chan_size(2048).build().fuse();
    add_default_keys(&Logger::root(drain, o!()))
}

/// Adds default log record data (key-value pairs) to specified [`Logger`]:
/// - `msg`: log record message.
/// - `fqn`: path to code line that called log function.
/// - `time`: creation date and time of log record in [RFC 3339] format.
/// - `lvl`: logging level of log record.
///
/// [RFC 3339]: https://www.ietf.org/rfc/rfc3339.txt
fn add_default_keys(logger: &Logger) -> Logger {
    logger.new(o!(
        "msg" => PushFnValue(move |record : &Record<'_>, ser| {
            ser.emit(record.msg())
        }),
        "fqn" => PushFnValue(move |record : &Record<'_>, ser| {
             ser.emit(format_args!("{}:{}", record.module(), record.line()))
        }),
        "time" => PushFnValue(move |_ : &Record<'_>, ser| {
            ser.emit(Local::now().to_rfc3339())
        }),
        "lvl" => FnValue(move |rinfo : &Record<'_>| {
            rinfo.level().as_str()
        }),
    ))
}

/// Converts an optional [`slog::Level`] into a [`FilterLevel`].
fn filter_level(level: Option<Level>) -> FilterLevel {
    level
        .and_then(|l| FilterLevel::from_usize(l.as_usize()))
        .unwrap_or(FilterLevel::Off)
}

/// Converts a [`slog::Level`] into a [`log::Level`].
fn facade_level(level: Level) -> ::log::Level {
    match level {
        Level::Critical | Level::Error => ::log::Level::Error,
        Level::Warning => ::log::Level::Warn,
        Level::Info => ::log::Level::Info,
        Level::Debug => ::log::Level::Debug,
        Level::Trace => ::log::Level::Trace,
    }
}
