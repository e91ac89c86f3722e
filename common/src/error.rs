use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("HTTP error {0}")]
    Status(u16),
    #[error("Failed to parse JSON response: {0}")]
    Parse(String),
    #[error("Missing key `{0}` in response")]
    MissingKey(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollErrorKind {
    Transport,
    Parse,
    MissingKey,
}

impl PollError {
    pub fn kind(&self) -> PollErrorKind {
        match self {
            Self::Connect(_) | Self::Status(_) => PollErrorKind::Transport,
            Self::Parse(_) => PollErrorKind::Parse,
            Self::MissingKey(_) => PollErrorKind::MissingKey,
        }
    }
}

impl From<serde_json::Error> for PollError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
