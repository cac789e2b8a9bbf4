//! The `Logger` collaborator (spec.md §6): an external sink the core calls
//! at significant state transitions and on every [`crate::error_handler::ErrorInfo`].
//! The logger may discard anything it receives — it is not consulted for
//! correctness, only observed.

use crate::error_handler::{ErrorHandler, ErrorInfo, ErrorLevel};
use std::sync::Once;

/// One log record, exactly the shape spec.md §6 describes.
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Severity.
    pub level: ErrorLevel,
    /// Component emitting the record (`"session"`, `"server"`, `"pool"`, ...).
    pub component: String,
    /// Operation in progress (`"connect"`, `"accept"`, `"release"`, ...).
    pub operation: String,
    /// Human-readable message.
    pub message: String,
}

/// A sink for [`LogRecord`]s. Implementations must not block the reactor
/// thread that calls them.
pub trait Logger: Send + Sync {
    /// Record one event. May discard.
    fn log(&self, record: LogRecord);
}

/// Default [`Logger`] backend: forwards every record to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, record: LogRecord) {
        match record.level {
            ErrorLevel::Info => {
                tracing::info!(component = record.component, operation = record.operation, "{}", record.message)
            }
            ErrorLevel::Warning => {
                tracing::warn!(component = record.component, operation = record.operation, "{}", record.message)
            }
            ErrorLevel::Error => {
                tracing::error!(component = record.component, operation = record.operation, "{}", record.message)
            }
            ErrorLevel::Critical => {
                tracing::error!(component = record.component, operation = record.operation, critical = true, "{}", record.message)
            }
        }
    }
}

/// A logger that discards every record. Useful for tests that would
/// otherwise be noisy.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn log(&self, _record: LogRecord) {}
}

/// Subscribe [`TracingLogger`] to the global [`ErrorHandler`] so every
/// accepted [`ErrorInfo`] report also reaches `tracing`, not just the
/// handler's own rings. Idempotent: every [`crate::reactor::Reactor::new`]
/// calls this, but only the first call installs the subscriber.
pub fn install_default_logger() {
    static INSTALLED: Once = Once::new();
    INSTALLED.call_once(|| {
        ErrorHandler::global().subscribe(|info: &ErrorInfo| {
            TracingLogger.log(LogRecord {
                timestamp_ms: info.timestamp_ms,
                level: info.level,
                component: info.component.clone(),
                operation: info.operation.clone(),
                message: info.message.clone(),
            });
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracing_logger_does_not_panic_on_any_level() {
        let logger = TracingLogger;
        for level in [ErrorLevel::Info, ErrorLevel::Warning, ErrorLevel::Error, ErrorLevel::Critical] {
            logger.log(LogRecord {
                timestamp_ms: 0,
                level,
                component: "test".to_string(),
                operation: "noop".to_string(),
                message: "hello".to_string(),
            });
        }
    }
}
