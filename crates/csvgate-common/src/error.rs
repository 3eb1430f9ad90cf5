//! Error types shared across csvgate crates

use thiserror::Error;

/// Result type alias for csvgate operations
pub type Result<T> = std::result::Result<T, GateError>;

/// Errors that are not specific to a single crate
#[derive(Error, Debug)]
pub enum GateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid {0}")]
    InvalidLogSetting(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_setting_message() {
        let err = GateError::InvalidLogSetting("log level `loud`".to_string());
        assert_eq!(err.to_string(), "Invalid log level `loud`");
    }
}
