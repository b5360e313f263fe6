use thiserror::Error;

/// Unified error type for the Rota client
#[derive(Error, Debug)]
pub enum RotaError {
    // Parsing errors
    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    #[error("Unsupported proxy protocol: {0}")]
    UnsupportedProtocol(String),

    // Request errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected response status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Unknown error after {attempts} attempts")]
    ProbeExhausted { attempts: u32 },

    #[error("Invalid JSON response: {0}")]
    Json(#[from] serde_json::Error),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for Rota client operations
pub type Result<T> = std::result::Result<T, RotaError>;

impl RotaError {
    /// Whether the error came from the request transport itself
    ///
    /// Only these count toward the failure threshold of a wrapped request.
    pub fn is_transport(&self) -> bool {
        matches!(self, RotaError::Transport(_))
    }

    /// Whether the error describes a malformed or unusable proxy spec
    pub fn is_spec_error(&self) -> bool {
        matches!(
            self,
            RotaError::InvalidProxyAddress(_) | RotaError::UnsupportedProtocol(_)
        )
    }
}

impl From<url::ParseError> for RotaError {
    fn from(err: url::ParseError) -> Self {
        RotaError::InvalidProxyAddress(err.to_string())
    }
}

impl From<reqwest::Error> for RotaError {
    fn from(err: reqwest::Error) -> Self {
        RotaError::Transport(err.to_string())
    }
}

impl From<hyper::Error> for RotaError {
    fn from(err: hyper::Error) -> Self {
        RotaError::Transport(err.to_string())
    }
}

impl From<http::Error> for RotaError {
    fn from(err: http::Error) -> Self {
        RotaError::Transport(err.to_string())
    }
}

impl From<std::io::Error> for RotaError {
    fn from(err: std::io::Error) -> Self {
        RotaError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification_helpers() {
        assert!(RotaError::Transport("reset".to_string()).is_transport());
        assert!(!RotaError::ProbeExhausted { attempts: 3 }.is_transport());

        assert!(RotaError::InvalidProxyAddress("bad".to_string()).is_spec_error());
        assert!(RotaError::UnsupportedProtocol("ftp".to_string()).is_spec_error());
        assert!(!RotaError::InvalidConfig("bad".to_string()).is_spec_error());
    }

    #[test]
    fn test_error_conversions() {
        let err: RotaError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, RotaError::InvalidProxyAddress(_)));

        let err: RotaError =
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused").into();
        assert!(err.is_transport());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            RotaError::ProbeExhausted { attempts: 3 }.to_string(),
            "Unknown error after 3 attempts"
        );
        assert_eq!(
            RotaError::UnexpectedStatus {
                status: 503,
                body: "busy".to_string()
            }
            .to_string(),
            "Unexpected response status 503: busy"
        );
    }
}
