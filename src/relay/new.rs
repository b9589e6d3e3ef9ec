use tracing::{debug, info};

use crate::{AppError, AppResult, db::UserId};

use super::{Relay, ServerEvent};

impl Relay {
    /// First contact between two users. No bot trigger on this path. Both
    /// users must exist for anything to be delivered; the message is kept
    /// either way.
    pub(crate) async fn new_private(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        text: String,
    ) -> AppResult<()> {
        let conversation = self
            .conversations
            .get_or_create_private(sender_id, receiver_id)
            .await?;

        let message = self.persist(&conversation, sender_id, &text).await?;
        let sender = self.sender(sender_id).await?;
        if self.store.find_user(receiver_id).await?.is_none() {
            return Err(AppError::UserNotFound(receiver_id));
        }

        self.fan_out(&conversation, message, sender).await?;
        info!(
            conversation = %conversation.id,
            sender = %sender_id,
            receiver = %receiver_id,
            "private message sent"
        );
        Ok(())
    }

    /// Announced to every connected client, not only the participants.
    pub(crate) async fn new_group(
        &self,
        name: String,
        subject: Option<String>,
        participants: Vec<UserId>,
        admin: Option<UserId>,
    ) -> AppResult<()> {
        let conversation = self
            .conversations
            .create_group(name, subject, participants, admin)
            .await?;

        let id = conversation.id;
        let reached = self.hub.broadcast(ServerEvent::GroupCreated { conversation });
        debug!(conversation = %id, reached, "group announced");
        Ok(())
    }
}
