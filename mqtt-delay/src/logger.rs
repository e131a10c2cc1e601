//! Logging bootstrap: a slog pipeline behind the `log` facade.

use std::fs::OpenOptions;

use anyhow::Result;
use slog::{o, Drain, Logger};
use slog_scope::GlobalLoggerGuard;

use crate::settings::logging::Log;

///Install the global logger per config. Keep the returned guard alive for
///the life of the process.
pub fn logger_init(cfg: &Log) -> Result<GlobalLoggerGuard> {
    let logger = config_logger(cfg)?;
    let guard = slog_scope::set_global_logger(logger);
    slog_stdlog::init_with_level(slog_to_log_level(cfg.level.inner()))?;
    Ok(guard)
}

fn config_logger(cfg: &Log) -> Result<Logger> {
    let drain: Box<dyn Drain<Ok = (), Err = slog::Never> + Send> = match (cfg.to.console(), cfg.to.file()) {
        (true, true) => Box::new(slog::Duplicate::new(console_format(), file_format(cfg)?).ignore_res()),
        (true, false) => Box::new(console_format().ignore_res()),
        (false, true) => Box::new(file_format(cfg)?.ignore_res()),
        (false, false) => Box::new(slog::Discard),
    };

    let drain = slog_async::Async::new(drain)
        .chan_size(8192)
        .overflow_strategy(slog_async::OverflowStrategy::DropAndReport)
        .build()
        .filter_level(cfg.level.inner())
        .ignore_res();

    Ok(Logger::root(drain, o!()))
}

fn console_format() -> slog_term::FullFormat<slog_term::TermDecorator> {
    let decorator = slog_term::TermDecorator::new().build();
    slog_term::FullFormat::new(decorator).build()
}

fn file_format(cfg: &Log) -> Result<slog_term::FullFormat<slog_term::PlainDecorator<std::fs::File>>> {
    let file = OpenOptions::new().create(true).append(true).open(cfg.filename())?;
    let decorator = slog_term::PlainDecorator::new(file);
    Ok(slog_term::FullFormat::new(decorator).build())
}

fn slog_to_log_level(level: slog::Level) -> log::Level {
    match level {
        slog::Level::Trace => log::Level::Trace,
        slog::Level::Debug => log::Level::Debug,
        slog::Level::Info => log::Level::Info,
        slog::Level::Warning => log::Level::Warn,
        slog::Level::Error => log::Level::Error,
        slog::Level::Critical => log::Level::Error,
    }
}
