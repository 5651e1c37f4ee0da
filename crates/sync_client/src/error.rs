use shared::{
    domain::{CardId, ColumnId, Phase},
    error::ApiError,
};
use thiserror::Error;

/// Reasons the board state machine refuses a mutation before any request is sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("no board is loaded")]
    NoBoard,
    #[error("board is finished")]
    BoardFinished,
    #[error("board is not finished")]
    BoardNotFinished,
    #[error("{identity} lacks control permission for {action}")]
    NotPermitted {
        identity: String,
        action: &'static str,
    },
    #[error("voting is only allowed during the voting phase (current: {current:?})")]
    WrongPhase { current: Phase },
    #[error("unknown card {0}")]
    UnknownCard(CardId),
    #[error("unknown column {0}")]
    UnknownColumn(ColumnId),
    #[error("card {0} cannot be merged into itself")]
    SelfMerge(CardId),
    #[error("card {0} already has merged children")]
    SourceHasChildren(CardId),
    #[error("card {0} is already merged into another card")]
    AlreadyMerged(CardId),
    #[error("card {0} is not merged")]
    NotMerged(CardId),
    #[error("card {0} has no merged children")]
    NoChildren(CardId),
    #[error("content must not be empty")]
    EmptyContent,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Rejected(#[from] Rejection),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("websocket error: {0}")]
    Transport(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
