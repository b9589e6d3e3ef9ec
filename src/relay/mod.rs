//! The relay: inbound socket events in, persisted messages fanned out.

mod events;
mod msg;
mod new;
mod ws;

pub use events::{DeliveredMessage, Inbound, Sender, ServerEvent};
pub use ws::relay_ws;

use std::{future::Future, sync::Arc};

use tokio_util::{
    sync::CancellationToken,
    task::{TaskTracker, task_tracker::TrackedFuture},
};
use tracing::{debug, error, info, warn};

use crate::{
    AppResult,
    bot::BotAdapter,
    connections::ConnectionHub,
    conversations::ConversationResolver,
    db::ConnectionId,
    presence::PresenceRegistry,
    store::ChatStore,
};

pub struct Relay {
    store: Arc<dyn ChatStore>,
    presence: PresenceRegistry,
    conversations: ConversationResolver,
    hub: ConnectionHub,
    bot: Option<BotAdapter>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl Relay {
    pub async fn start(
        store: Arc<dyn ChatStore>,
        hub: ConnectionHub,
        bot: Option<BotAdapter>,
    ) -> AppResult<Arc<Self>> {
        let presence = PresenceRegistry::start(store.clone()).await?;

        Ok(Arc::new(Self {
            conversations: ConversationResolver::new(store.clone()),
            store,
            presence,
            hub,
            bot,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }))
    }

    pub fn hub(&self) -> &ConnectionHub {
        &self.hub
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub async fn dispatch(self: &Arc<Self>, connection: ConnectionId, event: Inbound) -> AppResult<()> {
        match event {
            Inbound::RegisterPresence { user_id } => {
                if !self.hub.is_open(connection) {
                    debug!(%connection, user = %user_id, "registration from a closed socket ignored");
                    return Ok(());
                }
                self.presence.register_connection(user_id, connection).await
            }
            Inbound::SendMessage {
                sender_id,
                conversation_id,
                text,
            } => self.send_msg(sender_id, conversation_id, text).await,
            Inbound::CreatePrivateConversation {
                sender_id,
                receiver_id,
                text,
            } => self.new_private(sender_id, receiver_id, text).await,
            Inbound::CreateGroupConversation {
                name,
                subject,
                participants,
                admin,
            } => self.new_group(name, subject, participants, admin).await,
            Inbound::Disconnect => self.presence.clear_connection(connection).await.map(drop),
        }
    }

    /// Runs one event to completion. Failures end here: nothing is retried
    /// and the client is never told.
    pub async fn handle(self: Arc<Self>, connection: ConnectionId, event: Inbound) {
        let Err(e) = self.dispatch(connection, event).await else {
            return;
        };

        if e.is_not_found() {
            warn!(%connection, "event dropped: {e}");
        } else {
            error!(%connection, "event failed: {e}");
        }
    }

    /// Tracked so shutdown and [`Relay::settle`] can wait for it.
    pub(crate) fn track<F: Future>(&self, task: F) -> TrackedFuture<F> {
        self.tasks.track_future(task)
    }

    pub(crate) fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Waits until every spawned event and bot reply has finished. Test
    /// support: must not race [`Relay::shutdown`].
    #[doc(hidden)]
    pub async fn settle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        if !self.shutdown.is_cancelled() {
            self.tasks.reopen();
        }
    }

    pub async fn shutdown(&self) -> AppResult<()> {
        info!(in_flight = self.tasks.len(), "relay shutting down");
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        self.presence.shutdown().await
    }
}
