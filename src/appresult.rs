use uuid::Uuid;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("conversation {0} not found")]
    ConversationNotFound(Uuid),

    #[error("user {0} not found")]
    UserNotFound(Uuid),

    #[error("group conversation needs at least one participant")]
    EmptyGroup,

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored id is not a uuid: {0}")]
    CorruptId(#[from] uuid::Error),

    #[error("stored conversation kind {0:?} is unknown")]
    CorruptKind(String),
}

impl AppError {
    /// Events that fail this way are dropped quietly, the rest are operator errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::ConversationNotFound(_) | AppError::UserNotFound(_))
    }
}
