use std::{
    fmt,
    time::Duration,
};
use thiserror::Error;

/// Failure kinds surfaced by the game client.
///
/// `InvalidInput` and `SessionBusy` are produced locally before any wallet or
/// ledger interaction. Everything else originates at the wallet or ledger
/// boundary and is carried verbatim into a `Failed` session state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GameError {
    #[error("no wallet environment available; install or configure a wallet")]
    WalletUnavailable,
    #[error("wallet connection rejected: {0}")]
    UserRejected(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("signature declined: {0}")]
    SignatureDeclined(String),
    #[error("submission rejected by ledger: {0}")]
    SubmissionRejected(String),
    #[error("no confirmation after {0:?}")]
    ConfirmationTimeout(Duration),
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("a game is already in progress")]
    SessionBusy,
}

/// Stable discriminant of [`GameError`] for presentation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    WalletUnavailable,
    UserRejected,
    InvalidInput,
    SignatureDeclined,
    SubmissionRejected,
    ConfirmationTimeout,
    NetworkError,
    SessionBusy,
}

impl GameError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GameError::WalletUnavailable => ErrorKind::WalletUnavailable,
            GameError::UserRejected(_) => ErrorKind::UserRejected,
            GameError::InvalidInput(_) => ErrorKind::InvalidInput,
            GameError::SignatureDeclined(_) => ErrorKind::SignatureDeclined,
            GameError::SubmissionRejected(_) => ErrorKind::SubmissionRejected,
            GameError::ConfirmationTimeout(_) => ErrorKind::ConfirmationTimeout,
            GameError::NetworkError(_) => ErrorKind::NetworkError,
            GameError::SessionBusy => ErrorKind::SessionBusy,
        }
    }

    pub fn network(err: impl fmt::Display) -> Self {
        GameError::NetworkError(err.to_string())
    }

    /// True for failures where retrying a read is reasonable.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GameError::NetworkError(_) | GameError::ConfirmationTimeout(_)
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::WalletUnavailable => "wallet unavailable",
            ErrorKind::UserRejected => "connection rejected",
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::SignatureDeclined => "signature declined",
            ErrorKind::SubmissionRejected => "submission rejected",
            ErrorKind::ConfirmationTimeout => "confirmation timed out",
            ErrorKind::NetworkError => "network error",
            ErrorKind::SessionBusy => "session busy",
        };
        write!(f, "{name}")
    }
}

pub type Result<T, E = GameError> = std::result::Result<T, E>;
