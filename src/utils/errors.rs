use thiserror::Error;

/// Main error type for minctx
#[derive(Error, Debug)]
pub enum MinctxError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid hunk sequence: {0}")]
    InvalidHunkSequence(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: String, millis: u64 },

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl MinctxError {
    /// Stable identifier used in the JSON error envelope
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Io(_) => "io",
            Self::InvalidHunkSequence(_) => "invalid_hunk_sequence",
            Self::Parse(_) => "parse",
            Self::Config(_) => "config",
            Self::Timeout { .. } => "timeout",
            Self::Protocol(_) => "protocol",
        }
    }
}

impl From<serde_json::Error> for MinctxError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MinctxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(MinctxError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(
            MinctxError::Timeout {
                operation: "extract".into(),
                millis: 10
            }
            .kind(),
            "timeout"
        );

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(MinctxError::from(io).kind(), "io");
    }

    #[test]
    fn test_timeout_message() {
        let err = MinctxError::Timeout {
            operation: "extract".into(),
            millis: 250,
        };
        assert_eq!(err.to_string(), "extract timed out after 250ms");
    }
}
