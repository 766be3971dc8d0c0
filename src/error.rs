//! Error taxonomy shared by the catalog, resolver, store, binder and listener.

use crate::core::catalog::SignalId;

/// Result type for telemetry-core operations
pub type Result<T> = std::result::Result<T, IcError>;

/// Errors surfaced by the telemetry core
///
/// Per-frame problems (short frames, unknown IDs, inactive multiplex branches)
/// never show up here; the ingestion loop absorbs them.
#[derive(Debug, thiserror::Error)]
pub enum IcError {
    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Out of resources: {0}")]
    OutOfResources(String),

    #[error("Configuration(line {line}): could not find signal '{name}'")]
    NotFound { line: usize, name: String },

    #[error("Configuration(line {line}): {reason}")]
    InvalidConfiguration { line: usize, reason: String },

    #[error("Configuration(line {line}): invalid widget type '{name}'")]
    InvalidWidgetType { line: usize, name: String },

    #[error("Configuration(line {line}): widget '{label}' rejected its options: {reason}")]
    WidgetOptions {
        line: usize,
        label: String,
        reason: String,
    },

    #[error("Invalid catalog: {0}")]
    InvalidCatalog(String),

    #[error("CAN socket error: {0}")]
    Socket(String),

    #[error("CAN bind error on '{interface}': {reason}")]
    Bind { interface: String, reason: String },

    #[error("CAN listener closed")]
    Closed,

    #[error("Lock poisoned for signal {signal}")]
    Poisoned { signal: SignalId },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IcError {
    /// 1-based configuration line this error points at, if any
    pub fn line(&self) -> Option<usize> {
        match self {
            IcError::NotFound { line, .. }
            | IcError::InvalidConfiguration { line, .. }
            | IcError::InvalidWidgetType { line, .. }
            | IcError::WidgetOptions { line, .. } => Some(*line),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_is_reported() {
        let err = IcError::NotFound {
            line: 3,
            name: "Speed".to_string(),
        };
        assert_eq!(err.line(), Some(3));
        assert!(err.to_string().contains("line 3"));
        assert!(err.to_string().contains("Speed"));

        assert_eq!(IcError::Closed.line(), None);
    }
}
