//! Unified error types for proxyhost.
//!
//! Defines [`ProxyHostError`] (the main crate error enum),
//! [`ValidationError`] for per-field config validation failures, and
//! [`ErrorKind`], the stable projection of every error onto the names
//! reported across the host boundary. Error messages include contextual
//! hints to guide the user toward a fix.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::state::{EngineState, Operation};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "  {}: {}", self.field, self.message)?;
        if let Some(ref suggestion) = self.suggestion {
            write!(f, " ({suggestion})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

fn format_errors(errors: &[ValidationError]) -> String {
    use std::fmt::Write;
    let mut buf = String::new();
    for (i, e) in errors.iter().enumerate() {
        if i > 0 {
            buf.push('\n');
        }
        // write! to String is infallible (only fails on OOM which is unrecoverable)
        let _ = write!(buf, "{e}");
    }
    buf
}

/// Error taxonomy reported at the host boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    ConfigValidationError,
    StateConflictError,
    BindError,
    #[serde(rename = "TLSError")]
    TlsError,
    TimeoutError,
    InternalError,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConfigValidationError => "ConfigValidationError",
            Self::StateConflictError => "StateConflictError",
            Self::BindError => "BindError",
            Self::TlsError => "TLSError",
            Self::TimeoutError => "TimeoutError",
            Self::InternalError => "InternalError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProxyHostError {
    #[error("Config validation failed:\n{}", format_errors(.errors))]
    ConfigValidation { errors: Vec<ValidationError> },

    #[error("{operation} is not valid while the engine is {state}")]
    StateConflict {
        operation: Operation,
        state: EngineState,
    },

    #[error("{operation} rejected: another lifecycle operation is in progress")]
    Busy { operation: Operation },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS material for {addr} is unusable: {message}")]
    Tls { addr: SocketAddr, message: String },

    #[error("{operation} exceeded its {}ms window", .after.as_millis())]
    Timeout {
        operation: Operation,
        after: Duration,
    },

    #[error("Internal engine fault: {0}")]
    Internal(String),

    #[error("Config file not found: {}", path.display())]
    ConfigFileNotFound { path: PathBuf },

    #[error("Unsupported config format: '{0}'")]
    UnsupportedFormat(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl ProxyHostError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigValidation { .. } => ErrorKind::ConfigValidationError,
            Self::StateConflict { .. } | Self::Busy { .. } => ErrorKind::StateConflictError,
            Self::Bind { .. } => ErrorKind::BindError,
            Self::Tls { .. } => ErrorKind::TlsError,
            Self::Timeout { .. } => ErrorKind::TimeoutError,
            Self::Internal(_)
            | Self::ConfigFileNotFound { .. }
            | Self::UnsupportedFormat(_)
            | Self::Io(_) => ErrorKind::InternalError,
        }
    }

    /// Shorthand for a validation failure on a single field.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            errors: vec![ValidationError::new(field, message)],
        }
    }

    #[must_use]
    pub fn validation_errors(&self) -> &[ValidationError] {
        match self {
            Self::ConfigValidation { errors } => errors,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_cover_the_boundary_taxonomy() {
        let err = ProxyHostError::invalid("listeners[0].port", "port must be between 1 and 65535");
        assert_eq!(err.kind(), ErrorKind::ConfigValidationError);

        let err = ProxyHostError::Busy {
            operation: Operation::Reload,
        };
        assert_eq!(err.kind().as_str(), "StateConflictError");

        let err = ProxyHostError::Tls {
            addr: "127.0.0.1:8443".parse().unwrap(),
            message: "no certificates found".into(),
        };
        assert_eq!(serde_json::to_value(err.kind()).unwrap(), "TLSError");
    }

    #[test]
    fn validation_display_includes_suggestion() {
        let err = ValidationError::new("routes[0].match", "path must start with '/'")
            .with_suggestion("did you mean '/api'?");
        assert_eq!(
            err.to_string(),
            "  routes[0].match: path must start with '/' (did you mean '/api'?)"
        );
    }

    #[test]
    fn timeout_message_reports_window() {
        let err = ProxyHostError::Timeout {
            operation: Operation::Stop,
            after: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "stop exceeded its 250ms window");
    }
}
