//! Which users are reachable right now.
//!
//! The binding lives on the user record (`connection_id`), so this is only
//! the logic around reading and writing that field.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, info};

use crate::{
    AppResult,
    db::{ConnectionId, UserId},
    store::ChatStore,
};

#[derive(Clone)]
pub struct PresenceRegistry {
    store: Arc<dyn ChatStore>,
}

impl PresenceRegistry {
    /// Bindings left behind by an earlier process point at sockets nobody owns.
    pub async fn start(store: Arc<dyn ChatStore>) -> AppResult<Self> {
        let stale = store.clear_all_connections(OffsetDateTime::now_utc()).await?;
        if stale > 0 {
            info!(stale, "cleared stale presence bindings");
        }
        Ok(Self { store })
    }

    pub async fn shutdown(&self) -> AppResult<()> {
        let bound = self.store.clear_all_connections(OffsetDateTime::now_utc()).await?;
        info!(bound, "presence registry shut down");
        Ok(())
    }

    /// Last write wins: only the newest tab of a user is addressable.
    pub async fn register_connection(
        &self,
        user: UserId,
        connection: ConnectionId,
    ) -> AppResult<()> {
        self.store.set_connection(user, connection).await?;
        debug!(%user, %connection, "presence registered");
        Ok(())
    }

    pub async fn clear_connection(&self, connection: ConnectionId) -> AppResult<Option<UserId>> {
        let user = self
            .store
            .clear_connection(connection, OffsetDateTime::now_utc())
            .await?;

        match user {
            Some(user) => debug!(%user, %connection, "presence cleared"),
            None => debug!(%connection, "disconnect before registration"),
        }
        Ok(user)
    }

    pub async fn resolve(&self, user: UserId) -> AppResult<Option<ConnectionId>> {
        Ok(self
            .store
            .find_user(user)
            .await?
            .and_then(|user| user.connection_id))
    }

    /// Handles of the given users that are online; offline and unknown users
    /// are left out.
    pub async fn resolve_many(&self, users: &[UserId]) -> AppResult<Vec<(UserId, ConnectionId)>> {
        Ok(self
            .store
            .find_users(users)
            .await?
            .into_iter()
            .filter_map(|user| Some((user.id, user.connection_id?)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use uuid::Uuid;

    async fn registry() -> (PresenceRegistry, SqliteStore) {
        let store = SqliteStore::in_memory().await.unwrap();
        let registry = PresenceRegistry::start(Arc::new(store.clone())).await.unwrap();
        (registry, store)
    }

    #[tokio::test]
    async fn newest_registration_wins() {
        let (presence, store) = registry().await;
        let user = store.insert_user(Uuid::now_v7(), "ana").await.unwrap().id;
        let (first_tab, second_tab) = (Uuid::now_v7(), Uuid::now_v7());

        presence.register_connection(user, first_tab).await.unwrap();
        presence.register_connection(user, second_tab).await.unwrap();
        assert_eq!(presence.resolve(user).await.unwrap(), Some(second_tab));

        // the older tab no longer owns the user
        assert_eq!(presence.clear_connection(first_tab).await.unwrap(), None);
        assert_eq!(presence.resolve(user).await.unwrap(), Some(second_tab));
    }

    #[tokio::test]
    async fn disconnect_clears_presence_and_stamps_time() {
        let (presence, store) = registry().await;
        let user = store.insert_user(Uuid::now_v7(), "ana").await.unwrap().id;
        let handle = Uuid::now_v7();

        presence.register_connection(user, handle).await.unwrap();
        let before = OffsetDateTime::now_utc();
        assert_eq!(presence.clear_connection(handle).await.unwrap(), Some(user));

        assert_eq!(presence.resolve(user).await.unwrap(), None);
        let stamped = store.find_user(user).await.unwrap().unwrap().last_disconnected.unwrap();
        assert!(stamped.unix_timestamp() >= before.unix_timestamp());
    }

    #[tokio::test]
    async fn unknown_handle_and_unknown_user_are_no_ops() {
        let (presence, _store) = registry().await;
        assert_eq!(presence.clear_connection(Uuid::now_v7()).await.unwrap(), None);
        assert_eq!(presence.resolve(Uuid::now_v7()).await.unwrap(), None);
        presence
            .register_connection(Uuid::now_v7(), Uuid::now_v7())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn resolve_many_keeps_only_online_users() {
        let (presence, store) = registry().await;
        let ana = store.insert_user(Uuid::now_v7(), "ana").await.unwrap().id;
        let bo = store.insert_user(Uuid::now_v7(), "bo").await.unwrap().id;
        let ghost = Uuid::now_v7();
        let handle = Uuid::now_v7();
        presence.register_connection(ana, handle).await.unwrap();

        let online = presence.resolve_many(&[ana, bo, ghost]).await.unwrap();
        assert_eq!(online, vec![(ana, handle)]);
        assert!(presence.resolve_many(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn start_and_shutdown_drop_every_binding() {
        let store = SqliteStore::in_memory().await.unwrap();
        let user = store.insert_user(Uuid::now_v7(), "ana").await.unwrap().id;
        store.set_connection(user, Uuid::now_v7()).await.unwrap();

        let presence = PresenceRegistry::start(Arc::new(store.clone())).await.unwrap();
        assert_eq!(presence.resolve(user).await.unwrap(), None);

        presence.register_connection(user, Uuid::now_v7()).await.unwrap();
        presence.shutdown().await.unwrap();
        assert_eq!(presence.resolve(user).await.unwrap(), None);
    }
}
