use std::sync::Arc;

use tracing::{debug, error, info};

use crate::{
    AppError, AppResult,
    bot::BotAdapter,
    db::{ConnectionId, Conversation, ConversationId, Message, UserId},
};

use super::{DeliveredMessage, Relay, Sender, ServerEvent};

/// Online participants as resolved for one message.
pub(crate) type Recipients = Vec<(UserId, ConnectionId)>;

impl Relay {
    pub(crate) async fn send_msg(
        self: &Arc<Self>,
        sender_id: UserId,
        conversation_id: ConversationId,
        text: String,
    ) -> AppResult<()> {
        let Some(conversation) = self.store.find_conversation(conversation_id).await? else {
            return Err(AppError::ConversationNotFound(conversation_id));
        };

        let message = self.persist(&conversation, sender_id, &text).await?;
        let sender = self.sender(sender_id).await?;
        let recipients = self.fan_out(&conversation, message, sender).await?;

        if let Some(bot) = &self.bot {
            if let Some(question) = bot.question(&text) {
                self.spawn_bot_reply(bot.clone(), conversation, question.to_owned(), recipients);
            }
        }

        Ok(())
    }

    /// Stored and appended before anyone is resolved, so the message stays in
    /// history even when delivery is abandoned.
    pub(crate) async fn persist(
        &self,
        conversation: &Conversation,
        sender_id: UserId,
        text: &str,
    ) -> AppResult<Message> {
        let message = self.store.insert_message(sender_id, text).await?;
        self.store
            .append_message(conversation.id, message.id, message.created_at)
            .await?;
        Ok(message)
    }

    pub(crate) async fn sender(&self, sender_id: UserId) -> AppResult<Sender> {
        self.store
            .find_user(sender_id)
            .await?
            .map(|user| Sender::from(&user))
            .ok_or(AppError::UserNotFound(sender_id))
    }

    pub(crate) async fn fan_out(
        &self,
        conversation: &Conversation,
        message: Message,
        sender: Sender,
    ) -> AppResult<Recipients> {
        let recipients = self
            .presence
            .resolve_many(&conversation.participants)
            .await?;
        self.deliver(
            conversation,
            DeliveredMessage::new(message, sender),
            &recipients,
        );
        Ok(recipients)
    }

    fn deliver(
        &self,
        conversation: &Conversation,
        message: DeliveredMessage,
        recipients: &[(UserId, ConnectionId)],
    ) -> usize {
        let mut delivered = 0;
        for &(user, connection) in recipients {
            let event = ServerEvent::MessageReceived {
                message: message.clone(),
                conversation_id: conversation.id,
            };
            if self.hub.send_to(connection, event) {
                delivered += 1;
            } else {
                debug!(%user, %connection, "presence points at a closed socket");
            }
        }

        // offline participants see it on their next history fetch
        debug!(
            conversation = %conversation.id,
            message = %message.id,
            delivered,
            participants = conversation.participants.len(),
            "message fanned out"
        );
        delivered
    }

    /// The reply goes to the recipients resolved for the triggering message.
    fn spawn_bot_reply(
        self: &Arc<Self>,
        bot: BotAdapter,
        conversation: Conversation,
        question: String,
        recipients: Recipients,
    ) {
        let relay = self.clone();
        self.spawn(async move {
            let Some(reply) = bot.reply(&conversation, &question, &relay.shutdown).await else {
                return;
            };

            if let Err(e) = relay
                .post_bot_reply(&bot, &conversation, &reply, &recipients)
                .await
            {
                error!(conversation = %conversation.id, "bot reply failed: {e}");
            }
        });
    }

    async fn post_bot_reply(
        &self,
        bot: &BotAdapter,
        conversation: &Conversation,
        reply: &str,
        recipients: &[(UserId, ConnectionId)],
    ) -> AppResult<()> {
        let identity = bot.identity();
        let message = self.persist(conversation, identity.id, reply).await?;

        let sender = match self.store.find_user(identity.id).await? {
            Some(user) => Sender::from(&user),
            None => Sender {
                id: identity.id,
                username: identity.name.clone(),
            },
        };

        let delivered = self.deliver(
            conversation,
            DeliveredMessage::new(message, sender),
            recipients,
        );
        info!(conversation = %conversation.id, delivered, "bot replied");
        Ok(())
    }
}
