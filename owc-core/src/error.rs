//! Error types for owc-proxy.

use thiserror::Error;

/// Reasons a calendar source token can fail to decode.
///
/// Messages name the failing check only. They never include the token
/// itself or any decrypted bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is not valid URL-safe base64")]
    InvalidBase64,

    #[error("token is too short ({0} bytes)")]
    TooShort(usize),

    #[error("unsupported token version 0x{0:02x}")]
    BadVersion(u8),

    #[error("secret must decode to exactly 32 bytes")]
    InvalidSecret,

    #[error("token signature does not match")]
    InvalidSignature,

    #[error("token decryption failed")]
    DecryptFailed,

    #[error("decrypted token is not valid UTF-8")]
    InvalidUtf8,
}

/// Errors that terminate a proxied request.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Configuration error: missing {0}")]
    Configuration(&'static str),

    #[error("Token decode error: {0}")]
    Decode(#[from] TokenError),

    #[error("Access denied: calendar file downloads are not allowed")]
    AccessDenied,

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// HTTP status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            Self::AccessDenied => 403,
            _ => 500,
        }
    }
}

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid secret: {0}")]
    Secret(TokenError),

    #[error("Invalid upstream URL: {0}")]
    Upstream(#[from] url::ParseError),
}

/// Result type alias for request handling.
pub type ProxyResult<T> = Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_denied_is_forbidden() {
        assert_eq!(ProxyError::AccessDenied.status(), 403);
        assert_eq!(ProxyError::Configuration("secret").status(), 500);
        assert_eq!(ProxyError::from(TokenError::InvalidSignature).status(), 500);
    }

    #[test]
    fn test_messages_name_the_missing_item() {
        assert_eq!(
            ProxyError::Configuration("calendar_urls").to_string(),
            "Configuration error: missing calendar_urls"
        );
        assert_eq!(
            ProxyError::from(TokenError::TooShort(12)).to_string(),
            "Token decode error: token is too short (12 bytes)"
        );
    }
}
