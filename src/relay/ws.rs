use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::connections::Connection;

use super::{Inbound, Relay};

#[debug_handler(state = crate::AppState)]
pub async fn relay_ws(State(relay): State<Arc<Relay>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |stream| serve(relay, stream))
}

async fn serve(relay: Arc<Relay>, stream: WebSocket) {
    let Connection {
        id,
        mut direct,
        mut broadcast,
    } = relay.hub().open();
    info!(connection = %id, "client connected");

    let (mut sender, mut receiver) = stream.split();

    let outbound_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                Some(event) = direct.recv() => event,
                event = broadcast.recv() => match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(connection = %id, skipped, "socket fell behind broadcasts");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };

            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    warn!(connection = %id, "could not encode event: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Events of one socket run concurrently; closing the handle and the
    // disconnect wait for all of them.
    let in_flight = TaskTracker::new();
    while let Some(Ok(frame)) = receiver.next().await {
        let Message::Text(text) = frame else {
            continue;
        };

        match serde_json::from_str::<Inbound>(text.as_str()) {
            Ok(event) => {
                in_flight.spawn(relay.track(relay.clone().handle(id, event)));
            }
            Err(e) => debug!(connection = %id, "skipping frame: {e}"),
        }
    }

    outbound_task.abort();

    in_flight.close();
    in_flight.wait().await;
    relay.hub().close(id);
    relay.clone().handle(id, Inbound::Disconnect).await;
    info!(connection = %id, "client disconnected");
}
