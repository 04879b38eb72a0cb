use thiserror::Error;

/// Errors surfaced by the session client. `Clone` so a single refresh result
/// can be handed to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("not signed in")]
    Unauthenticated,
    #[error("access token rejected")]
    Unauthorized,
    #[error("session refresh failed: {0}")]
    RefreshFailed(String),
    #[error("session expired, please sign in again")]
    SessionExpired,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("api error {status} {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    #[error("credential storage error: {0}")]
    Storage(String),
}

impl ClientError {
    /// The server looked at the credential and said no, as opposed to the
    /// call never completing.
    pub fn is_rejection(&self) -> bool {
        match self {
            ClientError::Unauthorized => true,
            ClientError::Api { status, .. } => matches!(status, 400 | 401 | 403),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Transport(err.to_string())
        }
    }
}
