//! Persistence seam for users, conversations and messages.

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::{
    AppResult,
    db::{ConnectionId, Conversation, ConversationId, Message, MessageId, User, UserId},
};

/// Fields for a group conversation that does not exist yet.
#[derive(Debug, Clone)]
pub struct NewGroup {
    pub name: String,
    pub subject: Option<String>,
    pub participants: Vec<UserId>,
    pub admin: Option<UserId>,
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn find_user(&self, id: UserId) -> AppResult<Option<User>>;

    /// Unknown ids are left out of the result.
    async fn find_users(&self, ids: &[UserId]) -> AppResult<Vec<User>>;

    /// Binds `connection` to `user`, replacing whatever the user had.
    async fn set_connection(&self, user: UserId, connection: ConnectionId) -> AppResult<()>;

    /// Unbinds whichever user holds `connection`, returning that user.
    async fn clear_connection(
        &self,
        connection: ConnectionId,
        at: OffsetDateTime,
    ) -> AppResult<Option<UserId>>;

    /// Unbinds every user, returning how many were bound.
    async fn clear_all_connections(&self, at: OffsetDateTime) -> AppResult<u64>;

    async fn find_conversation(&self, id: ConversationId) -> AppResult<Option<Conversation>>;

    async fn find_private_conversation(
        &self,
        a: UserId,
        b: UserId,
    ) -> AppResult<Option<Conversation>>;

    /// Returns the existing conversation if another caller created the pair first.
    async fn insert_private_conversation(&self, a: UserId, b: UserId) -> AppResult<Conversation>;

    async fn insert_group_conversation(&self, group: NewGroup) -> AppResult<Conversation>;

    async fn insert_message(&self, sender: UserId, text: &str) -> AppResult<Message>;

    /// Atomically appends to the conversation's sequence and bumps `last_updated`.
    async fn append_message(
        &self,
        conversation: ConversationId,
        message: MessageId,
        at: OffsetDateTime,
    ) -> AppResult<()>;
}
