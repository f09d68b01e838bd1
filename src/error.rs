//! Error types for the conversion pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// A pipeline stage that is bounded by a timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Launch,
    Navigation,
    Capture,
    Print,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Launch => "engine launch",
            Stage::Navigation => "navigation",
            Stage::Capture => "screenshot capture",
            Stage::Print => "pdf printing",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while converting HTML to PDF
#[derive(Error, Debug)]
pub enum Error {
    /// The request was rejected before any engine resource was acquired
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The engine process could not be started, even after the fallback attempt
    #[error("Failed to launch browser: {cause}")]
    Launch { cause: String },

    /// A bounded stage ran past its deadline
    #[error("{stage} timed out after {ms}ms")]
    Timeout { stage: Stage, ms: u64 },

    /// Navigation, measurement or capture failed inside the engine
    #[error("Rendering failed: {0}")]
    Render(String),

    /// Raster or PDF encoding failed
    #[error("PDF assembly failed: {0}")]
    Assembly(String),

    /// The conversion was cancelled by the caller
    #[error("Conversion cancelled")]
    Cancelled,

    /// The session was used after `close()`
    #[error("Render session already closed")]
    SessionClosed,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A storage operation was invoked without storage settings
    #[error("Storage is not configured: {0}")]
    StorageUnconfigured(String),

    /// The storage backend failed
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A DevTools call failed outside any stage-specific handling
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    Cdp(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// HTTP status the service layer reports for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::StorageUnconfigured(_) => 503,
            _ => 500,
        }
    }

    /// Whether this error was caused by an expired deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Cdp(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_bad_request() {
        assert_eq!(Error::Validation("blank".into()).status_code(), 400);
        assert_eq!(Error::Launch { cause: "x".into() }.status_code(), 500);
        assert_eq!(Error::StorageUnconfigured("no dir".into()).status_code(), 503);
    }

    #[test]
    fn timeout_display_names_stage() {
        let e = Error::Timeout { stage: Stage::Navigation, ms: 30000 };
        assert_eq!(e.to_string(), "navigation timed out after 30000ms");
        assert!(e.is_timeout());
    }

    #[cfg(feature = "cdp")]
    #[test]
    fn protocol_failures_convert_to_cdp() {
        fn call() -> Result<()> {
            let reply: anyhow::Result<()> = Err(anyhow::anyhow!("Method not found"));
            reply?;
            Ok(())
        }
        match call() {
            Err(err @ Error::Cdp(_)) => {
                assert_eq!(err.to_string(), "CDP error: Method not found");
                assert_eq!(err.status_code(), 500);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
