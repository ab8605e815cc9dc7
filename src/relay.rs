// Broadcast relay - WebSocket fan-out of submitted concerns to every connected client.
// State lives in memory only and is lost on restart.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

use crate::api::ServerError;

const BROADCAST_CAPACITY: usize = 256;

/// Concern ids are whatever JSON the browser picked, usually a number or a string.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConcernId {
    Number(u64),
    Signed(i64),
    Float(f64),
    Text(String),
    Other(Value),
}

impl ConcernId {
    fn as_f64(&self) -> Option<f64> {
        match self {
            ConcernId::Number(n) => Some(*n as f64),
            ConcernId::Signed(n) => Some(*n as f64),
            ConcernId::Float(n) => Some(*n),
            _ => None,
        }
    }
}

// Browsers compare ids with `===`: numbers by value whatever their JSON spelling
impl PartialEq for ConcernId {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ConcernId::Text(a), ConcernId::Text(b)) => a == b,
            (ConcernId::Other(a), ConcernId::Other(b)) => a == b,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Concern {
    pub id: ConcernId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(
        rename = "groupBuyCount",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub group_buy_count: Option<u64>,
    // Anything else the client sent is relayed untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct JoinGroupBuy {
    pub id: ConcernId,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GroupBuyUpdate {
    pub id: ConcernId,
    #[serde(rename = "groupBuyCount")]
    pub group_buy_count: u64,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    Add(Concern),
    JoinGroupBuy(JoinGroupBuy),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    Init(Vec<Concern>),
    Add(Concern),
    UpdateGroupBuy(GroupBuyUpdate),
}

pub struct Relay {
    concerns: Mutex<Vec<Concern>>,
    tx: broadcast::Sender<String>,
    clients: AtomicUsize,
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}

impl Relay {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            concerns: Mutex::new(Vec::new()),
            tx,
            clients: AtomicUsize::new(0),
        }
    }

    pub fn snapshot(&self) -> Vec<Concern> {
        self.concerns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Subscribe a new client. The init payload and the subscription are taken under
    /// the same lock, so the client neither misses nor duplicates a broadcast.
    pub fn connect(&self) -> (String, broadcast::Receiver<String>) {
        let concerns = self.concerns.lock().unwrap_or_else(PoisonError::into_inner);
        let rx = self.tx.subscribe();
        let init = serde_json::to_string(&ServerMessage::Init(concerns.clone()))
            .unwrap_or_else(|_| r#"{"type":"init","data":[]}"#.to_string());
        (init, rx)
    }

    /// Apply one client message and broadcast the result. Malformed messages and
    /// unknown ids are logged and ignored.
    pub fn handle_text(&self, text: &str) -> Option<ServerMessage> {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Ignoring malformed relay message: {}", e);
                return None;
            }
        };

        // Mutate and broadcast under one lock so every client sees receipt order
        let mut concerns = self.concerns.lock().unwrap_or_else(PoisonError::into_inner);
        let reply = match message {
            ClientMessage::Add(concern) => {
                concerns.push(concern.clone());
                ServerMessage::Add(concern)
            }
            ClientMessage::JoinGroupBuy(JoinGroupBuy { id }) => {
                let Some(concern) = concerns.iter_mut().find(|c| c.id == id) else {
                    log::warn!("joinGroupBuy for unknown concern {:?}", id);
                    return None;
                };
                // A stored 0 counts as unset, like a falsy count in the browser
                let count = concern.group_buy_count.filter(|&c| c != 0).unwrap_or(1) + 1;
                concern.group_buy_count = Some(count);
                ServerMessage::UpdateGroupBuy(GroupBuyUpdate {
                    id,
                    group_buy_count: count,
                })
            }
        };

        match serde_json::to_string(&reply) {
            // No receivers is fine: nobody is listening right now
            Ok(json) => {
                let _ = self.tx.send(json);
            }
            Err(e) => log::error!("Failed to encode relay message: {}", e),
        }
        drop(concerns);
        Some(reply)
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(relay): State<Arc<Relay>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, relay))
}

async fn handle_socket(socket: WebSocket, relay: Arc<Relay>) {
    let (mut sender, mut receiver) = socket.split();
    let (init, mut rx) = relay.connect();
    let clients = relay.clients.fetch_add(1, Ordering::Relaxed) + 1;
    log::info!("Relay client connected ({} online)", clients);

    if sender.send(Message::Text(init)).await.is_ok() {
        let mut forward = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(text) => {
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("Relay client lagged by {} messages", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let inbound = relay.clone();
        let mut read = tokio::spawn(async move {
            while let Some(Ok(message)) = receiver.next().await {
                match message {
                    Message::Text(text) => {
                        inbound.handle_text(&text);
                    }
                    Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                        Ok(text) => {
                            inbound.handle_text(text);
                        }
                        Err(_) => log::warn!("Ignoring non-UTF-8 relay frame"),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });

        tokio::select! {
            _ = &mut forward => read.abort(),
            _ = &mut read => forward.abort(),
        }
    }

    let clients = relay.clients.fetch_sub(1, Ordering::Relaxed) - 1;
    log::info!("Relay client disconnected ({} online)", clients);
}

pub fn create_router(relay: Arc<Relay>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .with_state(relay)
}

pub async fn run_relay(relay: Arc<Relay>, port: u16) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .map_err(|source| ServerError::Bind { port, source })?;
    log::info!("WebSocket relay running on ws://localhost:{}", port);
    axum::serve(listener, create_router(relay)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    type Client =
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

    fn concern_json(id: u64) -> Value {
        serde_json::json!({
            "region": "north",
            "concern": "soil",
            "env": "forest",
            "lang": "en",
            "groupBuyCount": 1,
            "id": id
        })
    }

    async fn start_relay() -> (std::net::SocketAddr, Arc<Relay>) {
        let relay = Arc::new(Relay::new());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = create_router(relay.clone());
        tokio::spawn(async move { axum::serve(listener, app).await });
        (addr, relay)
    }

    async fn connect(addr: std::net::SocketAddr) -> Client {
        let (client, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
            .await
            .expect("relay should accept connections");
        client
    }

    async fn next_json(client: &mut Client) -> Value {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .expect("timed out waiting for relay message")
                .expect("stream ended")
                .expect("websocket error");
            if let WsMessage::Text(text) = frame {
                return serde_json::from_str(&text).expect("relay sends JSON");
            }
        }
    }

    async fn send_json(client: &mut Client, value: Value) {
        client
            .send(WsMessage::Text(value.to_string()))
            .await
            .expect("send should succeed");
    }

    #[test]
    fn add_then_join_counts_from_one() {
        let relay = Relay::new();
        relay.handle_text(&serde_json::json!({"type": "add", "data": {"id": 7}}).to_string());
        let reply = relay
            .handle_text(r#"{"type":"joinGroupBuy","data":{"id":7}}"#)
            .expect("known id should update");
        assert_eq!(
            reply,
            ServerMessage::UpdateGroupBuy(GroupBuyUpdate {
                id: ConcernId::Number(7),
                group_buy_count: 2
            })
        );
    }

    #[test]
    fn fractional_and_negative_ids_are_kept_and_matched() {
        let relay = Relay::new();
        assert!(relay.handle_text(r#"{"type":"add","data":{"id":1.5}}"#).is_some());
        assert!(relay.handle_text(r#"{"type":"add","data":{"id":-3}}"#).is_some());
        assert_eq!(relay.snapshot().len(), 2);

        let reply = relay
            .handle_text(r#"{"type":"joinGroupBuy","data":{"id":-3}}"#)
            .expect("negative id should match");
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            serde_json::json!({"type":"updateGroupBuy","data":{"id":-3,"groupBuyCount":2}})
        );
        assert!(relay
            .handle_text(r#"{"type":"joinGroupBuy","data":{"id":1.5}}"#)
            .is_some());
    }

    #[test]
    fn numeric_ids_compare_by_value() {
        assert_eq!(ConcernId::Number(2), ConcernId::Float(2.0));
        assert_eq!(ConcernId::Signed(-1), ConcernId::Float(-1.0));
        assert_ne!(ConcernId::Number(2), ConcernId::Text("2".to_string()));
    }

    #[test]
    fn zero_group_buy_count_counts_as_unset() {
        let relay = Relay::new();
        relay.handle_text(r#"{"type":"add","data":{"id":4,"groupBuyCount":0}}"#);
        let reply = relay
            .handle_text(r#"{"type":"joinGroupBuy","data":{"id":4}}"#)
            .unwrap();
        assert_eq!(
            reply,
            ServerMessage::UpdateGroupBuy(GroupBuyUpdate {
                id: ConcernId::Number(4),
                group_buy_count: 2
            })
        );
    }

    #[test]
    fn malformed_and_unknown_messages_are_ignored() {
        let relay = Relay::new();
        assert!(relay.handle_text("not json").is_none());
        assert!(relay.handle_text(r#"{"type":"shout","data":{}}"#).is_none());
        assert!(relay
            .handle_text(r#"{"type":"joinGroupBuy","data":{"id":404}}"#)
            .is_none());
        assert!(relay.snapshot().is_empty());
    }

    #[test]
    fn unknown_fields_and_string_ids_survive() {
        let relay = Relay::new();
        let reply = relay
            .handle_text(r#"{"type":"add","data":{"id":"abc","mood":"damp","lang":"sv"}}"#)
            .unwrap();
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type":"add","data":{"id":"abc","lang":"sv","mood":"damp"}})
        );
    }

    #[test]
    fn connect_reports_current_list() {
        let relay = Relay::new();
        relay.handle_text(&serde_json::json!({"type":"add","data": concern_json(1)}).to_string());
        let (init, _rx) = relay.connect();
        let init: Value = serde_json::from_str(&init).unwrap();
        assert_eq!(init, serde_json::json!({"type":"init","data":[concern_json(1)]}));
    }

    #[tokio::test]
    async fn add_is_broadcast_and_replayed_to_new_clients() {
        let (addr, _relay) = start_relay().await;
        let mut a = connect(addr).await;
        let mut b = connect(addr).await;
        assert_eq!(next_json(&mut a).await, serde_json::json!({"type":"init","data":[]}));
        assert_eq!(next_json(&mut b).await, serde_json::json!({"type":"init","data":[]}));

        let add = serde_json::json!({"type":"add","data": concern_json(1)});
        send_json(&mut a, add.clone()).await;
        assert_eq!(next_json(&mut b).await, add);
        assert_eq!(next_json(&mut a).await, add);

        let mut c = connect(addr).await;
        assert_eq!(
            next_json(&mut c).await,
            serde_json::json!({"type":"init","data":[concern_json(1)]})
        );
    }

    #[tokio::test]
    async fn group_buy_updates_arrive_in_order() {
        let (addr, relay) = start_relay().await;
        let mut a = connect(addr).await;
        let mut b = connect(addr).await;
        next_json(&mut a).await;
        next_json(&mut b).await;

        send_json(&mut a, serde_json::json!({"type":"add","data": concern_json(1)})).await;
        next_json(&mut a).await;
        next_json(&mut b).await;

        let join = serde_json::json!({"type":"joinGroupBuy","data":{"id":1}});
        send_json(&mut a, join.clone()).await;
        send_json(&mut a, join).await;

        for client in [&mut a, &mut b] {
            for expected in [2, 3] {
                assert_eq!(
                    next_json(client).await,
                    serde_json::json!({"type":"updateGroupBuy","data":{"id":1,"groupBuyCount":expected}})
                );
            }
        }
        assert_eq!(relay.snapshot()[0].group_buy_count, Some(3));
    }

    #[tokio::test]
    async fn malformed_frames_do_not_drop_the_connection() {
        let (addr, _relay) = start_relay().await;
        let mut a = connect(addr).await;
        next_json(&mut a).await;
        a.send(WsMessage::Text("{{{".to_string())).await.unwrap();
        let add = serde_json::json!({"type":"add","data": concern_json(9)});
        send_json(&mut a, add.clone()).await;
        assert_eq!(next_json(&mut a).await, add);
    }
}
