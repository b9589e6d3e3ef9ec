use serde::Serialize;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{AppError, AppResult};

pub type UserId = Uuid;
pub type ConversationId = Uuid;
pub type MessageId = Uuid;
pub type ConnectionId = Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL,
    connection_id TEXT UNIQUE,
    last_disconnected TEXT
);

CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    name TEXT,
    subject TEXT,
    admin_id TEXT,
    private_key TEXT UNIQUE,
    last_updated TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS conversation_participants (
    conversation_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    PRIMARY KEY (conversation_id, user_id)
);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    sender_id TEXT NOT NULL,
    text TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS conversation_messages (
    conversation_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    message_id TEXT NOT NULL UNIQUE,
    PRIMARY KEY (conversation_id, seq)
);
"#;

pub async fn init_schema(db_pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(db_pool).await?;
    Ok(())
}

/// Profile data is owned elsewhere; the relay only touches the presence fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub connection_id: Option<ConnectionId>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_disconnected: Option<OffsetDateTime>,

    // unique: id
    // unique: connection_id
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Private,
    Group,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Private => "private",
            ConversationKind::Group => "group",
        }
    }

    pub fn parse(s: &str) -> AppResult<Self> {
        match s {
            "private" => Ok(ConversationKind::Private),
            "group" => Ok(ConversationKind::Group),
            other => Err(AppError::CorruptKind(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    pub participants: Vec<UserId>,
    /// Append order is delivery order.
    pub messages: Vec<MessageId>,
    pub subject: Option<String>,
    pub name: Option<String>,
    pub admin: Option<UserId>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,

    // unique: id
    // unique: private_key (private only)
}

impl Conversation {
    /// The non-blank subject, if any.
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// Order-independent identity of a private pair.
pub fn private_key(a: UserId, b: UserId) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}:{hi}")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender: UserId,
    pub text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_key_ignores_order() {
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        assert_eq!(private_key(a, b), private_key(b, a));
        assert_ne!(private_key(a, b), private_key(a, a));
    }

    #[test]
    fn unknown_kind_is_corrupt() {
        assert_eq!(ConversationKind::parse("group").unwrap(), ConversationKind::Group);
        assert_eq!(ConversationKind::parse("private").unwrap(), ConversationKind::Private);
        let err = ConversationKind::parse("channel").unwrap_err();
        assert!(matches!(err, AppError::CorruptKind(kind) if kind == "channel"));
    }

    #[test]
    fn blank_subject_counts_as_missing() {
        let mut conversation = Conversation {
            id: Uuid::now_v7(),
            kind: ConversationKind::Group,
            participants: vec![],
            messages: vec![],
            subject: Some("   ".to_owned()),
            name: None,
            admin: None,
            last_updated: OffsetDateTime::now_utc(),
        };
        assert_eq!(conversation.subject(), None);

        conversation.subject = Some(" Geography ".to_owned());
        assert_eq!(conversation.subject(), Some("Geography"));
    }

    #[test]
    fn conversation_serializes_type_tag() {
        let conversation = Conversation {
            id: Uuid::now_v7(),
            kind: ConversationKind::Group,
            participants: vec![],
            messages: vec![],
            subject: None,
            name: Some("geo".to_owned()),
            admin: None,
            last_updated: OffsetDateTime::now_utc(),
        };
        let json = serde_json::to_value(&conversation).unwrap();
        assert_eq!(json["type"], "group");
        assert_eq!(json["name"], "geo");
        assert!(json["lastUpdated"].is_string());
    }
}
