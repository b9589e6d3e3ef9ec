use std::sync::Arc;

use tracing::info;

use crate::{
    AppError, AppResult,
    db::{Conversation, UserId},
    store::{ChatStore, NewGroup},
};

#[derive(Clone)]
pub struct ConversationResolver {
    store: Arc<dyn ChatStore>,
}

impl ConversationResolver {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// `{a, b}` and `{b, a}` name the same conversation.
    pub async fn get_or_create_private(&self, a: UserId, b: UserId) -> AppResult<Conversation> {
        if let Some(conversation) = self.store.find_private_conversation(a, b).await? {
            return Ok(conversation);
        }

        let conversation = self.store.insert_private_conversation(a, b).await?;
        info!(conversation = %conversation.id, "private conversation opened");
        Ok(conversation)
    }

    pub async fn create_group(
        &self,
        name: String,
        subject: Option<String>,
        participants: Vec<UserId>,
        admin: Option<UserId>,
    ) -> AppResult<Conversation> {
        if participants.is_empty() {
            return Err(AppError::EmptyGroup);
        }

        let conversation = self
            .store
            .insert_group_conversation(NewGroup {
                name,
                subject,
                participants,
                admin,
            })
            .await?;
        info!(conversation = %conversation.id, "group conversation created");
        Ok(conversation)
    }
}
