// chat_relay.rs - WebRTC signaling relay and demo chat server
// Purpose: axum server that groups WebSocket peers into rooms and forwards
//          offers, answers, ICE candidates and chat text between them
//
// Routes:
//   GET /        demo page
//   GET /ws      signaling WebSocket
//   GET /health  "ok"
//   GET /rooms   {"room": peer_count}

use crate::chat_tls::{self, TlsPaths};
use crate::tunnel::Tunnel;
use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use colored::*;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const CHAT_PAGE: &str = include_str!("../assets/chat.html");
const MAX_ROOM_NAME: usize = 64;
const MAX_PEER_NAME: usize = 32;
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Frames sent by browsers
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join { room: String, name: String },
    Offer { to: Option<String>, sdp: String },
    Answer { to: Option<String>, sdp: String },
    Candidate { to: Option<String>, candidate: serde_json::Value },
    Chat { text: String },
    Leave,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: String,
    pub name: String,
}

/// Frames sent by the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Joined { id: String, room: String, peers: Vec<PeerInfo> },
    PeerJoined { id: String, name: String },
    PeerLeft { id: String },
    Offer { from: String, sdp: String },
    Answer { from: String, sdp: String },
    Candidate { from: String, candidate: serde_json::Value },
    Chat { from: String, name: String, text: String },
    Error { message: String },
}

struct Peer {
    name: String,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

/// Shared room registry
#[derive(Clone)]
pub struct ChatState {
    rooms: Arc<DashMap<String, HashMap<String, Peer>>>,
    max_peers: usize,
}

impl ChatState {
    pub fn new(max_peers: usize) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            max_peers: max_peers.max(1),
        }
    }

    /// Add a peer; returns the peers already present
    fn join(&self, room: &str, peer: PeerInfo, tx: mpsc::UnboundedSender<ServerMessage>) -> Result<Vec<PeerInfo>, String> {
        let mut members = self.rooms.entry(room.to_string()).or_default();
        if members.len() >= self.max_peers {
            return Err(format!("Room '{}' is full ({} peers max)", room, self.max_peers));
        }

        let existing: Vec<PeerInfo> = members
            .iter()
            .map(|(id, p)| PeerInfo { id: id.clone(), name: p.name.clone() })
            .collect();
        for other in members.values() {
            let _ = other.tx.send(ServerMessage::PeerJoined { id: peer.id.clone(), name: peer.name.clone() });
        }
        members.insert(peer.id, Peer { name: peer.name, tx });
        Ok(existing)
    }

    fn leave(&self, room: &str, peer_id: &str) {
        let now_empty = match self.rooms.get_mut(room) {
            Some(mut members) => {
                if members.remove(peer_id).is_some() {
                    for other in members.values() {
                        let _ = other.tx.send(ServerMessage::PeerLeft { id: peer_id.to_string() });
                    }
                }
                members.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.rooms.remove_if(room, |_, members| members.is_empty());
        }
    }

    /// Deliver to `to`, or to everyone else in the room
    fn relay(&self, room: &str, from: &str, to: Option<&str>, message: ServerMessage) -> Result<(), String> {
        let members = self.rooms.get(room).ok_or_else(|| "Room no longer exists".to_string())?;
        match to {
            Some(target) => {
                let peer = members
                    .get(target)
                    .filter(|_| target != from)
                    .ok_or_else(|| format!("Unknown peer '{}'", target))?;
                let _ = peer.tx.send(message);
            }
            None => {
                for (id, peer) in members.iter().filter(|(id, _)| id.as_str() != from) {
                    if peer.tx.send(message.clone()).is_err() {
                        tracing::debug!(peer = %id, "peer channel closed");
                    }
                }
            }
        }
        Ok(())
    }

    pub fn room_counts(&self) -> BTreeMap<String, usize> {
        self.rooms.iter().map(|r| (r.key().clone(), r.value().len())).collect()
    }

    fn peer_name(&self, room: &str, peer_id: &str) -> String {
        self.rooms
            .get(room)
            .and_then(|m| m.get(peer_id).map(|p| p.name.clone()))
            .unwrap_or_default()
    }
}

pub fn router(state: ChatState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(|| async { "ok" }))
        .route("/rooms", get(rooms))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(CHAT_PAGE)
}

async fn rooms(State(state): State<ChatState>) -> Json<BTreeMap<String, usize>> {
    Json(state.room_counts())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ChatState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn clean_label(value: &str, max: usize) -> String {
    value.trim().chars().filter(|c| !c.is_control()).take(max).collect()
}

async fn handle_socket(socket: WebSocket, state: ChatState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to encode signaling message");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let peer_id = short_id();
    let mut room: Option<String> = None;
    tracing::debug!(peer = %peer_id, "websocket connected");

    while let Some(Ok(frame)) = stream.next().await {
        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let reply = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(message) => handle_message(&state, &peer_id, &mut room, &tx, message),
            Err(e) => Err(format!("Invalid message: {}", e)),
        };
        if let Err(message) = reply {
            let _ = tx.send(ServerMessage::Error { message });
        }
    }

    if let Some(room) = room {
        state.leave(&room, &peer_id);
    }
    tracing::debug!(peer = %peer_id, "websocket closed");
    drop(tx);
    drain_writer(writer, WRITER_DRAIN_TIMEOUT).await;
}

/// Let the writer flush frames already queued for the peer, aborting it if
/// the socket stalls
async fn drain_writer(writer: JoinHandle<()>, wait: Duration) {
    let abort = writer.abort_handle();
    if tokio::time::timeout(wait, writer).await.is_err() {
        tracing::debug!("websocket writer did not drain in time");
        abort.abort();
    }
}

fn handle_message(
    state: &ChatState,
    peer_id: &str,
    room: &mut Option<String>,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    message: ClientMessage,
) -> Result<(), String> {
    if let ClientMessage::Join { room: requested, name } = message {
        if room.is_some() {
            return Err("Already in a room; leave first".to_string());
        }
        let requested = clean_label(&requested, MAX_ROOM_NAME);
        if requested.is_empty() {
            return Err("Room name is required".to_string());
        }
        let mut name = clean_label(&name, MAX_PEER_NAME);
        if name.is_empty() {
            name = format!("peer-{}", peer_id);
        }

        let peer = PeerInfo { id: peer_id.to_string(), name };
        let peers = state.join(&requested, peer, tx.clone())?;
        let _ = tx.send(ServerMessage::Joined { id: peer_id.to_string(), room: requested.clone(), peers });
        *room = Some(requested);
        return Ok(());
    }

    let current = room.clone().ok_or_else(|| "Join a room first".to_string())?;
    let from = peer_id.to_string();
    match message {
        ClientMessage::Offer { to, sdp } => state.relay(&current, peer_id, to.as_deref(), ServerMessage::Offer { from, sdp }),
        ClientMessage::Answer { to, sdp } => state.relay(&current, peer_id, to.as_deref(), ServerMessage::Answer { from, sdp }),
        ClientMessage::Candidate { to, candidate } => {
            state.relay(&current, peer_id, to.as_deref(), ServerMessage::Candidate { from, candidate })
        }
        ClientMessage::Chat { text } => {
            let name = state.peer_name(&current, peer_id);
            state.relay(&current, peer_id, None, ServerMessage::Chat { from, name, text })
        }
        ClientMessage::Leave => {
            state.leave(&current, peer_id);
            *room = None;
            Ok(())
        }
        ClientMessage::Join { .. } => Ok(()),
    }
}

#[derive(Debug, Clone)]
pub struct ChatServerConfig {
    pub bind: SocketAddr,
    pub max_peers: usize,
    pub tls: Option<TlsPaths>,
    pub tunnel: bool,
    pub cloudflared_binary: String,
}

impl Default for ChatServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_peers: 8,
            tls: None,
            tunnel: false,
            cloudflared_binary: "cloudflared".to_string(),
        }
    }
}

/// Serve until Ctrl+C / SIGTERM
pub async fn run_chat_server(config: &ChatServerConfig) -> Result<()> {
    let app = router(ChatState::new(config.max_peers));

    let (server, local_url) = match &config.tls {
        Some(paths) => {
            chat_tls::ensure_certificate(paths)?;
            let rustls = axum_server::tls_rustls::RustlsConfig::from_pem_file(&paths.cert, &paths.key)
                .await
                .with_context(|| format!("Failed to load TLS pair {} / {}", paths.cert.display(), paths.key.display()))?;
            let handle = axum_server::Handle::new();
            let shutdown_handle = handle.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                shutdown_handle.graceful_shutdown(Some(Duration::from_secs(5)));
            });
            let server = axum_server::bind_rustls(config.bind, rustls)
                .handle(handle)
                .serve(app.into_make_service());
            let task = tokio::spawn(async move { server.await.context("HTTPS server failed") });
            (task, format!("https://{}", config.bind))
        }
        None => {
            let listener = tokio::net::TcpListener::bind(config.bind)
                .await
                .with_context(|| format!("Failed to bind {}", config.bind))?;
            let task = tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown_signal())
                    .await
                    .context("HTTP server failed")
            });
            (task, format!("http://{}", config.bind))
        }
    };

    println!("{}", format!("[+] Chat server listening on {}", local_url).green().bold());
    println!("{}", format!("[*] Signaling endpoint: {}/ws", local_url.replacen("http", "ws", 1)).cyan());

    let tunnel = if config.tunnel {
        match Tunnel::start(&config.cloudflared_binary, &local_url).await {
            Ok(t) => {
                println!("{}", format!("[+] Public URL: {}", t.public_url).green().bold());
                Some(t)
            }
            Err(e) => {
                println!("{}", format!("[!] Tunnel unavailable: {:#}", e).yellow());
                None
            }
        }
    } else {
        None
    };

    let result = server.await.context("Server task panicked");
    if let Some(t) = tunnel {
        t.shutdown().await;
    }
    println!("{}", "[+] Chat server shut down gracefully".green());
    result?
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => println!("{}", "\n[!] Received Ctrl+C, shutting down...".yellow()),
        _ = terminate => println!("{}", "\n[!] Received SIGTERM, shutting down...".yellow()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{base_url, spawn_server, test_client};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    #[tokio::test]
    async fn test_writer_drains_queued_frames() {
        let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();
        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                tokio::time::sleep(Duration::from_millis(50)).await;
                let _ = out_tx.send(message);
            }
        });

        tx.send(ServerMessage::Error { message: "Room 'x' is full".into() }).unwrap();
        tx.send(ServerMessage::PeerLeft { id: "p1".into() }).unwrap();
        drop(tx);
        drain_writer(writer, Duration::from_secs(2)).await;

        assert!(matches!(out_rx.try_recv(), Ok(ServerMessage::Error { .. })));
        assert!(matches!(out_rx.try_recv(), Ok(ServerMessage::PeerLeft { .. })));
    }

    #[tokio::test]
    async fn test_stalled_writer_is_aborted() {
        let writer = tokio::spawn(std::future::pending::<()>());
        let started = std::time::Instant::now();
        drain_writer(writer, Duration::from_millis(100)).await;
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    async fn connect(addr: SocketAddr) -> Client {
        let (ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
        ws
    }

    async fn send(ws: &mut Client, value: serde_json::Value) {
        ws.send(WsMessage::Text(value.to_string())).await.unwrap();
    }

    async fn recv(ws: &mut Client) -> ServerMessage {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(3), ws.next())
                .await
                .expect("timed out waiting for frame")
                .unwrap()
                .unwrap();
            if let WsMessage::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn join(ws: &mut Client, room: &str, name: &str) -> ServerMessage {
        send(ws, serde_json::json!({"type": "join", "room": room, "name": name})).await;
        recv(ws).await
    }

    #[tokio::test]
    async fn test_signaling_flow() {
        let addr = spawn_server(router(ChatState::new(8))).await;
        let mut alice = connect(addr).await;
        let mut bob = connect(addr).await;

        let alice_id = match join(&mut alice, "lobby", "alice").await {
            ServerMessage::Joined { id, room, peers } => {
                assert_eq!(room, "lobby");
                assert!(peers.is_empty());
                id
            }
            other => panic!("unexpected {:?}", other),
        };
        let bob_id = match join(&mut bob, "lobby", "bob").await {
            ServerMessage::Joined { id, peers, .. } => {
                assert_eq!(peers, vec![PeerInfo { id: alice_id.clone(), name: "alice".into() }]);
                id
            }
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(recv(&mut alice).await, ServerMessage::PeerJoined { id: bob_id.clone(), name: "bob".into() });

        send(&mut alice, serde_json::json!({"type": "offer", "sdp": "v=0 offer"})).await;
        assert_eq!(recv(&mut bob).await, ServerMessage::Offer { from: alice_id.clone(), sdp: "v=0 offer".into() });

        send(&mut bob, serde_json::json!({"type": "answer", "to": alice_id, "sdp": "v=0 answer"})).await;
        assert_eq!(recv(&mut alice).await, ServerMessage::Answer { from: bob_id.clone(), sdp: "v=0 answer".into() });

        send(&mut bob, serde_json::json!({"type": "candidate", "to": alice_id, "candidate": {"candidate": "c1", "sdpMid": "0"}})).await;
        match recv(&mut alice).await {
            ServerMessage::Candidate { from, candidate } => {
                assert_eq!(from, bob_id);
                assert_eq!(candidate["candidate"], "c1");
            }
            other => panic!("unexpected {:?}", other),
        }

        send(&mut alice, serde_json::json!({"type": "chat", "text": "hi bob"})).await;
        assert_eq!(
            recv(&mut bob).await,
            ServerMessage::Chat { from: alice_id.clone(), name: "alice".into(), text: "hi bob".into() }
        );

        let rooms: BTreeMap<String, usize> =
            test_client().get(format!("{}/rooms", base_url(addr))).send().await.unwrap().json().await.unwrap();
        assert_eq!(rooms.get("lobby"), Some(&2));

        bob.close(None).await.unwrap();
        assert_eq!(recv(&mut alice).await, ServerMessage::PeerLeft { id: bob_id });
    }

    #[tokio::test]
    async fn test_room_limit_and_errors() {
        let addr = spawn_server(router(ChatState::new(1))).await;
        let mut first = connect(addr).await;
        let mut second = connect(addr).await;

        send(&mut second, serde_json::json!({"type": "chat", "text": "early"})).await;
        assert!(matches!(recv(&mut second).await, ServerMessage::Error { message } if message.contains("Join a room")));

        assert!(matches!(join(&mut first, "tiny", "a").await, ServerMessage::Joined { .. }));
        assert!(matches!(join(&mut second, "tiny", "b").await, ServerMessage::Error { message } if message.contains("full")));

        send(&mut first, serde_json::json!({"type": "offer", "to": "nobody", "sdp": "x"})).await;
        assert!(matches!(recv(&mut first).await, ServerMessage::Error { message } if message.contains("Unknown peer")));

        send(&mut first, serde_json::json!({"type": "bogus"})).await;
        assert!(matches!(recv(&mut first).await, ServerMessage::Error { message } if message.contains("Invalid message")));

        send(&mut first, serde_json::json!({"type": "leave"})).await;
        send(&mut first, serde_json::json!({"type": "chat", "text": "still here?"})).await;
        assert!(matches!(recv(&mut first).await, ServerMessage::Error { message } if message.contains("Join a room")));
        assert!(matches!(join(&mut second, "tiny", "b").await, ServerMessage::Joined { .. }));
    }

    #[tokio::test]
    async fn test_health_and_index() {
        let base = base_url(spawn_server(router(ChatState::new(8))).await);
        let client = test_client();
        assert_eq!(client.get(format!("{}/health", base)).send().await.unwrap().text().await.unwrap(), "ok");
        let page = client.get(format!("{}/", base)).send().await.unwrap().text().await.unwrap();
        assert!(page.contains("RTCPeerConnection"));
        let rooms: BTreeMap<String, usize> = client.get(format!("{}/rooms", base)).send().await.unwrap().json().await.unwrap();
        assert!(rooms.is_empty());
    }
}
