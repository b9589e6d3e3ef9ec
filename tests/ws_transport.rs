use std::{sync::Arc, time::Duration};

use chat_relay::{
    AppState,
    connections::ConnectionHub,
    db::UserId,
    relay::Relay,
    router,
    store::{ChatStore, SqliteStore},
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use uuid::Uuid;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Server {
    store: SqliteStore,
    relay: Arc<Relay>,
    url: String,
}

impl Server {
    async fn start() -> Self {
        let store = SqliteStore::in_memory().await.unwrap();
        let relay = Relay::start(Arc::new(store.clone()), ConnectionHub::new(), None)
            .await
            .unwrap();
        let app = router(
            AppState {
                relay: relay.clone(),
            },
            "http://localhost:3000",
        )
        .unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        Self { store, relay, url }
    }

    async fn connect(&self) -> Client {
        connect_async(self.url.as_str()).await.unwrap().0
    }
}

fn frame(event: &str, data: Value) -> Message {
    Message::text(json!({ "event": event, "data": data }).to_string())
}

fn register(user: UserId) -> Message {
    frame("register-presence", json!({ "userId": user }))
}

async fn next_event(client: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("no frame within 2s")
            .unwrap()
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// The socket side runs on its own tasks, so state is polled for.
async fn eventually(check: impl AsyncFn() -> bool) {
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held");
}

#[tokio::test]
async fn bad_frames_are_skipped_and_the_socket_keeps_working() {
    let server = Server::start().await;
    let ana = server.store.insert_user(Uuid::now_v7(), "ana").await.unwrap().id;
    let mut client = server.connect().await;

    client.send(Message::text("not json")).await.unwrap();
    client
        .send(frame("no-such-event", json!({})))
        .await
        .unwrap();
    client.send(Message::binary(vec![1, 2, 3])).await.unwrap();
    client.send(register(ana)).await.unwrap();

    let presence = server.relay.presence();
    eventually(async || presence.resolve(ana).await.unwrap().is_some()).await;

    client
        .send(frame(
            "create-group-conversation",
            json!({ "name": "geo", "subject": "Geography", "participants": [ana], "admin": ana }),
        ))
        .await
        .unwrap();
    let created = next_event(&mut client).await;
    assert_eq!(created["event"], "group-created");
    let group = created["data"]["conversation"]["id"].clone();

    client
        .send(frame(
            "send-message",
            json!({ "senderId": ana, "conversationId": group.clone(), "text": "hello" }),
        ))
        .await
        .unwrap();
    let received = next_event(&mut client).await;
    assert_eq!(received["event"], "message-received");
    assert_eq!(received["data"]["conversationId"], group);
    assert_eq!(received["data"]["message"]["text"], "hello");
    assert_eq!(received["data"]["message"]["sender"]["username"], "ana");
}

#[tokio::test]
async fn closing_the_socket_drops_the_handle_and_presence() {
    let server = Server::start().await;
    let ana = server.store.insert_user(Uuid::now_v7(), "ana").await.unwrap().id;
    let mut client = server.connect().await;
    client.send(register(ana)).await.unwrap();

    let presence = server.relay.presence();
    eventually(async || presence.resolve(ana).await.unwrap().is_some()).await;
    let handle = presence.resolve(ana).await.unwrap().unwrap();
    assert!(server.relay.hub().is_open(handle));

    client.close(None).await.unwrap();
    eventually(async || !server.relay.hub().is_open(handle)).await;
    eventually(async || presence.resolve(ana).await.unwrap().is_none()).await;
}

#[tokio::test]
async fn registration_right_before_close_is_cleared_by_the_disconnect() {
    let server = Server::start().await;
    let ana = server.store.insert_user(Uuid::now_v7(), "ana").await.unwrap().id;
    let mut client = server.connect().await;

    client.send(register(ana)).await.unwrap();
    client.close(None).await.unwrap();

    // only a disconnect that finds ana bound stamps the time
    eventually(async || {
        let user = server.store.find_user(ana).await.unwrap().unwrap();
        user.last_disconnected.is_some()
    })
    .await;
    let user = server.store.find_user(ana).await.unwrap().unwrap();
    assert_eq!(user.connection_id, None);
}
