use reqwest::StatusCode;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("Unauthorized - please login again")]
    Unauthorized,

    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Transport(String),

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("{0}")]
    Validation(String),

    #[error("Counter worker has stopped")]
    Closed,
}

impl ClientError {
    pub fn api(status: StatusCode, message: Option<String>) -> Self {
        Self::Api {
            status: status.as_u16(),
            message: message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| format!("HTTP error! status: {}", status.as_u16())),
        }
    }

    pub fn io(err: impl std::error::Error) -> Self {
        Self::Io(err.to_string())
    }

    /// Whether a failed sync may succeed if sent again unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_falls_back_to_status_message() {
        let err = ClientError::api(StatusCode::NOT_FOUND, None);
        assert_eq!(err.to_string(), "HTTP error! status: 404");

        let err = ClientError::api(StatusCode::BAD_REQUEST, Some("  ".into()));
        assert_eq!(err.to_string(), "HTTP error! status: 400");

        let err = ClientError::api(StatusCode::BAD_REQUEST, Some("User not found".into()));
        assert_eq!(err.to_string(), "User not found");
    }

    #[test]
    fn retryable_errors() {
        assert!(ClientError::Transport("reset".into()).is_retryable());
        assert!(ClientError::api(StatusCode::SERVICE_UNAVAILABLE, None).is_retryable());
        assert!(ClientError::api(StatusCode::TOO_MANY_REQUESTS, None).is_retryable());
        assert!(!ClientError::api(StatusCode::BAD_REQUEST, None).is_retryable());
        assert!(!ClientError::Unauthorized.is_retryable());
        assert!(!ClientError::Decode("bad".into()).is_retryable());
    }
}
