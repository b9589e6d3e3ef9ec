//! Live sockets owned by this process.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

use crate::{db::ConnectionId, relay::ServerEvent};

const BROADCAST_CAPACITY: usize = 256;

/// The receiving side of one socket.
pub struct Connection {
    pub id: ConnectionId,
    pub direct: mpsc::UnboundedReceiver<ServerEvent>,
    pub broadcast: broadcast::Receiver<ServerEvent>,
}

#[derive(Clone)]
pub struct ConnectionHub {
    senders: Arc<RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<ServerEvent>>>>,
    tx: broadcast::Sender<ServerEvent>,
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self {
            senders: Arc::default(),
            tx: broadcast::channel(BROADCAST_CAPACITY).0,
        }
    }

    /// Hands out a fresh handle; handles are never reused.
    pub fn open(&self) -> Connection {
        let id = Uuid::now_v7();
        let (sender, direct) = mpsc::unbounded_channel();
        self.senders.write().insert(id, sender);

        Connection {
            id,
            direct,
            broadcast: self.tx.subscribe(),
        }
    }

    pub fn close(&self, id: ConnectionId) {
        self.senders.write().remove(&id);
    }

    pub fn is_open(&self, id: ConnectionId) -> bool {
        self.senders.read().contains_key(&id)
    }

    /// False when the handle is gone or its socket stopped reading.
    pub fn send_to(&self, id: ConnectionId, event: ServerEvent) -> bool {
        let Some(sender) = self.senders.read().get(&id).cloned() else {
            debug!(connection = %id, "no live socket for handle");
            return false;
        };
        sender.send(event).is_ok()
    }

    /// Every open socket, participant or not.
    pub fn broadcast(&self, event: ServerEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}
