//! Error types returned by fallible `conduit` operations.
//!
//! This is distinct from [`crate::error_handler::ErrorInfo`]: `Error` is
//! what constructors and validation return through `Result`; `ErrorInfo`
//! is the retained, fanned-out report the runtime emits for things that
//! happen *after* construction (a dropped connection, a pool allocation
//! failure) and that have no caller around to receive a `Result`.

use crate::error_handler::{ErrorCategory, ErrorLevel};

/// Result type alias for `conduit` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while configuring or operating a transport.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying OS I/O failure.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// A builder option failed validation before any resource was acquired.
    #[error("configuration error: {message}")]
    Config {
        /// Descriptive message.
        message: String,
    },

    /// Connection establishment or teardown failed.
    #[error("connection error: {message}")]
    Connection {
        /// Descriptive message.
        message: String,
    },

    /// A read or write on an established stream failed.
    #[error("communication error: {message}")]
    Communication {
        /// Descriptive message.
        message: String,
    },

    /// The memory pool could not satisfy a request.
    #[error("memory error: {message}")]
    Memory {
        /// Descriptive message.
        message: String,
    },

    /// A reactor- or OS-level failure not attributable to one connection.
    #[error("system error: {message}")]
    System {
        /// Descriptive message.
        message: String,
    },

    /// Anything that does not fit the other categories.
    #[error("{message}")]
    Other {
        /// Descriptive message.
        message: String,
    },
}

impl Error {
    /// Build a [`Error::Config`].
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into() }
    }

    /// Build a [`Error::Connection`].
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Build a [`Error::Communication`].
    pub fn communication<S: Into<String>>(message: S) -> Self {
        Self::Communication { message: message.into() }
    }

    /// Build a [`Error::Memory`].
    pub fn memory<S: Into<String>>(message: S) -> Self {
        Self::Memory { message: message.into() }
    }

    /// Build a [`Error::System`].
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System { message: message.into() }
    }

    /// Build a [`Error::Other`].
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other { message: message.into() }
    }

    /// Whether the condition that produced this error is expected to
    /// clear on its own (and so should arm a retry rather than give up).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Communication { .. })
    }

    /// The category this error maps to for [`crate::error_handler::ErrorInfo`] reporting.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Io { .. } => ErrorCategory::System,
            Self::Config { .. } => ErrorCategory::Configuration,
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Communication { .. } => ErrorCategory::Communication,
            Self::Memory { .. } => ErrorCategory::Memory,
            Self::System { .. } => ErrorCategory::System,
            Self::Other { .. } => ErrorCategory::Unknown,
        }
    }

    /// The severity this error maps to for [`crate::error_handler::ErrorInfo`] reporting.
    pub fn level(&self) -> ErrorLevel {
        match self {
            Self::Memory { .. } => ErrorLevel::Critical,
            _ => ErrorLevel::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification_matches_taxonomy() {
        assert!(Error::connection("refused").is_retryable());
        assert!(Error::communication("reset").is_retryable());
        assert!(!Error::config("bad port").is_retryable());
        assert!(!Error::memory("oversize").is_retryable());
    }

    #[test]
    fn memory_errors_are_critical() {
        assert_eq!(Error::memory("oom").level(), ErrorLevel::Critical);
        assert_eq!(Error::config("bad").level(), ErrorLevel::Error);
    }
}
