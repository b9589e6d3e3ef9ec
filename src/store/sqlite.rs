use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool, sqlite::SqlitePoolOptions};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    AppError, AppResult,
    db::{
        self, ConnectionId, Conversation, ConversationId, ConversationKind, Message, MessageId,
        User, UserId,
    },
};

use super::{ChatStore, NewGroup};

type UserRow = (String, String, Option<String>, Option<OffsetDateTime>);
type ConversationRow = (String, String, Option<String>, Option<String>, Option<String>, OffsetDateTime);

const USER_COLUMNS: &str = "SELECT id,username,connection_id,last_disconnected FROM users";

#[derive(Clone)]
pub struct SqliteStore {
    db_pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn connect(database_url: &str) -> AppResult<Self> {
        let db_pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;
        db::init_schema(&db_pool).await?;
        Ok(Self::new(db_pool))
    }

    /// A private database that lives as long as the store.
    pub async fn in_memory() -> AppResult<Self> {
        let db_pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        db::init_schema(&db_pool).await?;
        Ok(Self::new(db_pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db_pool
    }

    /// Users are normally provisioned by the account service; this is for seeding.
    pub async fn insert_user(&self, id: UserId, username: &str) -> AppResult<User> {
        sqlx::query("INSERT INTO users (id,username) VALUES (?,?)")
            .bind(id.to_string())
            .bind(username)
            .execute(&self.db_pool)
            .await?;

        Ok(User {
            id,
            username: username.to_owned(),
            connection_id: None,
            last_disconnected: None,
        })
    }

    async fn load_conversation(&self, id: &str) -> AppResult<Option<Conversation>> {
        let Some((id, kind, name, subject, admin_id, last_updated)): Option<ConversationRow> =
            sqlx::query_as(
                "SELECT id,kind,name,subject,admin_id,last_updated FROM conversations WHERE id=?",
            )
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?
        else {
            return Ok(None);
        };

        let participants: Vec<(String,)> = sqlx::query_as(
            "SELECT user_id FROM conversation_participants WHERE conversation_id=? ORDER BY rowid",
        )
        .bind(&id)
        .fetch_all(&self.db_pool)
        .await?;

        let messages: Vec<(String,)> = sqlx::query_as(
            "SELECT message_id FROM conversation_messages WHERE conversation_id=? ORDER BY seq",
        )
        .bind(&id)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(Some(Conversation {
            id: Uuid::parse_str(&id)?,
            kind: ConversationKind::parse(&kind)?,
            participants: parse_ids(participants)?,
            messages: parse_ids(messages)?,
            subject,
            name,
            admin: admin_id.as_deref().map(Uuid::parse_str).transpose()?,
            last_updated,
        }))
    }
}

fn parse_ids(rows: Vec<(String,)>) -> AppResult<Vec<Uuid>> {
    rows.into_iter()
        .map(|(id,)| Uuid::parse_str(&id).map_err(AppError::from))
        .collect()
}

fn user_from_row((id, username, connection_id, last_disconnected): UserRow) -> AppResult<User> {
    Ok(User {
        id: Uuid::parse_str(&id)?,
        username,
        connection_id: connection_id.as_deref().map(Uuid::parse_str).transpose()?,
        last_disconnected,
    })
}

/// Drops repeats while keeping first-seen order.
fn unique(ids: impl IntoIterator<Item = UserId>) -> Vec<UserId> {
    let mut out: Vec<UserId> = Vec::new();
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn find_user(&self, id: UserId) -> AppResult<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(&format!("{USER_COLUMNS} WHERE id=?"))
            .bind(id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;

        row.map(user_from_row).transpose()
    }

    async fn find_users(&self, ids: &[UserId]) -> AppResult<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = QueryBuilder::<Sqlite>::new(USER_COLUMNS);
        query.push(" WHERE id IN (");
        let mut list = query.separated(", ");
        for id in ids {
            list.push_bind(id.to_string());
        }
        list.push_unseparated(")");

        let rows: Vec<UserRow> = query.build_query_as().fetch_all(&self.db_pool).await?;
        rows.into_iter().map(user_from_row).collect()
    }

    async fn set_connection(&self, user: UserId, connection: ConnectionId) -> AppResult<()> {
        let user = user.to_string();
        let connection = connection.to_string();

        let mut tx = self.db_pool.begin().await?;
        sqlx::query("UPDATE users SET connection_id=NULL WHERE connection_id=? AND id<>?")
            .bind(&connection)
            .bind(&user)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE users SET connection_id=? WHERE id=?")
            .bind(&connection)
            .bind(&user)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(())
    }

    async fn clear_connection(
        &self,
        connection: ConnectionId,
        at: OffsetDateTime,
    ) -> AppResult<Option<UserId>> {
        let row: Option<(String,)> = sqlx::query_as(
            "UPDATE users SET connection_id=NULL, last_disconnected=? WHERE connection_id=? RETURNING id",
        )
        .bind(at)
        .bind(connection.to_string())
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(row.map(|(id,)| Uuid::parse_str(&id)).transpose()?)
    }

    async fn clear_all_connections(&self, at: OffsetDateTime) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE users SET connection_id=NULL, last_disconnected=? WHERE connection_id IS NOT NULL",
        )
        .bind(at)
        .execute(&self.db_pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn find_conversation(&self, id: ConversationId) -> AppResult<Option<Conversation>> {
        self.load_conversation(&id.to_string()).await
    }

    async fn find_private_conversation(
        &self,
        a: UserId,
        b: UserId,
    ) -> AppResult<Option<Conversation>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT id FROM conversations WHERE private_key=? AND kind=?")
                .bind(db::private_key(a, b))
                .bind(ConversationKind::Private.as_str())
                .fetch_optional(&self.db_pool)
                .await?;

        match row {
            Some((id,)) => self.load_conversation(&id).await,
            None => Ok(None),
        }
    }

    async fn insert_private_conversation(&self, a: UserId, b: UserId) -> AppResult<Conversation> {
        let id = Uuid::now_v7();

        let mut tx = self.db_pool.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO conversations (id,kind,private_key,last_updated) VALUES (?,?,?,?) \
             ON CONFLICT(private_key) DO NOTHING",
        )
        .bind(id.to_string())
        .bind(ConversationKind::Private.as_str())
        .bind(db::private_key(a, b))
        .bind(OffsetDateTime::now_utc())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 1 {
            for user in unique([a, b]) {
                sqlx::query("INSERT INTO conversation_participants (conversation_id,user_id) VALUES (?,?)")
                    .bind(id.to_string())
                    .bind(user.to_string())
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;

        self.find_private_conversation(a, b)
            .await?
            .ok_or(AppError::ConversationNotFound(id))
    }

    async fn insert_group_conversation(&self, group: NewGroup) -> AppResult<Conversation> {
        let id = Uuid::now_v7();
        let participants = unique(group.participants);
        let last_updated = OffsetDateTime::now_utc();

        let mut tx = self.db_pool.begin().await?;
        sqlx::query(
            "INSERT INTO conversations (id,kind,name,subject,admin_id,last_updated) VALUES (?,?,?,?,?,?)",
        )
        .bind(id.to_string())
        .bind(ConversationKind::Group.as_str())
        .bind(&group.name)
        .bind(&group.subject)
        .bind(group.admin.as_ref().map(Uuid::to_string))
        .bind(last_updated)
        .execute(&mut *tx)
        .await?;

        for user in &participants {
            sqlx::query("INSERT INTO conversation_participants (conversation_id,user_id) VALUES (?,?)")
                .bind(id.to_string())
                .bind(user.to_string())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(Conversation {
            id,
            kind: ConversationKind::Group,
            participants,
            messages: Vec::new(),
            subject: group.subject,
            name: Some(group.name),
            admin: group.admin,
            last_updated,
        })
    }

    async fn insert_message(&self, sender: UserId, text: &str) -> AppResult<Message> {
        let message = Message {
            id: Uuid::now_v7(),
            sender,
            text: text.to_owned(),
            created_at: OffsetDateTime::now_utc(),
        };

        sqlx::query("INSERT INTO messages (id,sender_id,text,created_at) VALUES (?,?,?,?)")
            .bind(message.id.to_string())
            .bind(message.sender.to_string())
            .bind(&message.text)
            .bind(message.created_at)
            .execute(&self.db_pool)
            .await?;

        Ok(message)
    }

    async fn append_message(
        &self,
        conversation: ConversationId,
        message: MessageId,
        at: OffsetDateTime,
    ) -> AppResult<()> {
        let conversation_id = conversation.to_string();

        // The slot is computed inside the insert, so concurrent appends cannot collide.
        let mut tx = self.db_pool.begin().await?;
        sqlx::query(
            "INSERT INTO conversation_messages (conversation_id,seq,message_id) \
             SELECT ?, COALESCE(MAX(seq), -1) + 1, ? FROM conversation_messages WHERE conversation_id=?",
        )
        .bind(&conversation_id)
        .bind(message.to_string())
        .bind(&conversation_id)
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query("UPDATE conversations SET last_updated=? WHERE id=?")
            .bind(at)
            .bind(&conversation_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(AppError::ConversationNotFound(conversation));
        }
        tx.commit().await?;

        Ok(())
    }
}
