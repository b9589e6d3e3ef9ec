use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::db::{Conversation, ConversationId, Message, MessageId, User, UserId};

/// Everything a socket can cause. Frames arrive as `{"event": .., "data": {..}}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum Inbound {
    RegisterPresence {
        user_id: UserId,
    },
    SendMessage {
        sender_id: UserId,
        conversation_id: ConversationId,
        text: String,
    },
    CreatePrivateConversation {
        sender_id: UserId,
        receiver_id: UserId,
        text: String,
    },
    CreateGroupConversation {
        name: String,
        subject: Option<String>,
        participants: Vec<UserId>,
        admin: Option<UserId>,
    },
    /// Raised by the transport when the socket closes.
    #[serde(skip)]
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    MessageReceived {
        message: DeliveredMessage,
        conversation_id: ConversationId,
    },
    GroupCreated {
        conversation: Conversation,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sender {
    pub id: UserId,
    pub username: String,
}

impl From<&User> for Sender {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
        }
    }
}

/// A persisted message with its author resolved for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredMessage {
    pub id: MessageId,
    pub sender: Sender,
    pub text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl DeliveredMessage {
    pub fn new(message: Message, sender: Sender) -> Self {
        Self {
            id: message.id,
            sender,
            text: message.text,
            created_at: message.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn parses_send_message_frame() {
        let (sender, conversation) = (Uuid::now_v7(), Uuid::now_v7());
        let frame = json!({
            "event": "send-message",
            "data": { "senderId": sender, "conversationId": conversation, "text": "hi" }
        });

        let inbound: Inbound = serde_json::from_value(frame).unwrap();
        assert_eq!(
            inbound,
            Inbound::SendMessage {
                sender_id: sender,
                conversation_id: conversation,
                text: "hi".to_owned(),
            }
        );
    }

    #[test]
    fn group_subject_and_admin_are_optional() {
        let user = Uuid::now_v7();
        let frame = json!({
            "event": "create-group-conversation",
            "data": { "name": "study", "participants": [user] }
        });

        let Inbound::CreateGroupConversation { subject, admin, participants, .. } =
            serde_json::from_value(frame).unwrap()
        else {
            panic!("wrong variant");
        };
        assert_eq!(subject, None);
        assert_eq!(admin, None);
        assert_eq!(participants, vec![user]);
    }

    #[test]
    fn disconnect_cannot_be_sent_by_clients() {
        let frame = json!({ "event": "disconnect", "data": {} });
        assert!(serde_json::from_value::<Inbound>(frame).is_err());
    }

    #[test]
    fn message_received_shape() {
        let conversation = Uuid::now_v7();
        let sender = Sender {
            id: Uuid::now_v7(),
            username: "ana".to_owned(),
        };
        let event = ServerEvent::MessageReceived {
            message: DeliveredMessage {
                id: Uuid::now_v7(),
                sender,
                text: "hi".to_owned(),
                created_at: OffsetDateTime::now_utc(),
            },
            conversation_id: conversation,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "message-received");
        assert_eq!(json["data"]["conversationId"], conversation.to_string());
        assert_eq!(json["data"]["message"]["sender"]["username"], "ana");
        assert!(json["data"]["message"]["createdAt"].is_string());
    }
}
