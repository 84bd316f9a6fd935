//! Thin facade over slog so the rest of the workspace imports one module.
//!
//! Components take `Into<Option<&Logger>>` in their constructors and fall
//! back to a `Discard` root, so library code never forces a sink choice on
//! the caller.

pub use slog::{crit, debug, error, info, o, trace, warn};
pub use slog::{Discard, Drain, Logger};

use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// Builds a terminal logger writing to stderr at the supplied level.
/// Unrecognized level strings fall back to `info`.
pub fn terminal(level: &str) -> Logger {
    let severity = match level {
        "trace" => Severity::Trace,
        "debug" => Severity::Debug,
        "info" => Severity::Info,
        "warning" | "warn" => Severity::Warning,
        "error" => Severity::Error,
        "critical" => Severity::Critical,
        _ => Severity::Info,
    };

    let mut builder = TerminalLoggerBuilder::new();
    builder.level(severity);
    builder.destination(Destination::Stderr);

    builder.build().expect("Error building terminal logger")
}

/// A logger that swallows everything. Used as the default in constructors
/// that accept an optional parent logger.
pub fn null() -> Logger {
    Logger::root(Discard, o!())
}

/// Resolves the common `Into<Option<&Logger>>` constructor argument into a
/// child logger or a discard root.
pub fn child<'a, L: Into<Option<&'a Logger>>>(log: L) -> Logger {
    match log.into() {
        Some(log) => log.new(o!()),
        None => null(),
    }
}
