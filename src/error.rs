use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Non-success response. `message` is the response body, or a generic
    /// status line when the body was empty.
    #[error("{message}")]
    Http { status: u16, message: String },

    #[error("network: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("decode: {0}")]
    Decode(String),

    #[error("{0}")]
    Validation(String),

    #[error("not signed in")]
    Unauthenticated,

    #[error("identity provider: {0}")]
    Identity(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(error: serde_json::Error) -> Self {
        Self::Decode(error.to_string())
    }
}
