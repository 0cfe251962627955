use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;

use super::mock_rpc::block_hash;

/// WebSocket node double that acknowledges `eth_subscribe(["newHeads"])` and
/// pushes announced heights to every subscribed session.
pub struct MockHeadServer {
    url: String,
    state: Arc<ServerState>,
    heads: broadcast::Sender<u64>,
    shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct ServerState {
    connections: AtomicUsize,
    subscriptions: AtomicUsize,
    unsubscribes: AtomicUsize,
    sessions: Mutex<CancellationToken>,
    hushed: Mutex<CancellationToken>,
}

impl MockHeadServer {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock websocket listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock websocket address")?;

        let state = Arc::new(ServerState::default());
        let (heads, _) = broadcast::channel(64);
        let shutdown = CancellationToken::new();

        let handle = {
            let state = state.clone();
            let heads = heads.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let accepted = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        accepted = listener.accept() => accepted,
                    };
                    let Ok((stream, _)) = accepted else {
                        continue;
                    };
                    let session_stop = state
                        .sessions
                        .lock()
                        .expect("mock websocket state poisoned")
                        .child_token();
                    let session_hush = state
                        .hushed
                        .lock()
                        .expect("mock websocket state poisoned")
                        .child_token();
                    tokio::spawn(serve_session(
                        stream,
                        state.clone(),
                        heads.subscribe(),
                        session_stop,
                        session_hush,
                    ));
                }
            })
        };

        Ok(Self {
            url: ws_url(addr),
            state,
            heads,
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Pushes `height` to every live subscription.
    pub fn announce(&self, height: u64) {
        let _ = self.heads.send(height);
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> usize {
        self.state.subscriptions.load(Ordering::SeqCst)
    }

    pub fn unsubscribes(&self) -> usize {
        self.state.unsubscribes.load(Ordering::SeqCst)
    }

    /// Closes every open session while continuing to accept new ones.
    pub fn drop_connections(&self) {
        let mut sessions = self
            .state
            .sessions
            .lock()
            .expect("mock websocket state poisoned");
        sessions.cancel();
        *sessions = CancellationToken::new();
    }

    /// Open sessions stop reading, replying and pushing but keep the socket
    /// open. Sessions accepted afterwards behave normally.
    pub fn silence_sessions(&self) {
        let mut hushed = self
            .state
            .hushed
            .lock()
            .expect("mock websocket state poisoned");
        hushed.cancel();
        *hushed = CancellationToken::new();
    }

    /// Stops accepting, closes every session, and frees the port.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        self.drop_connections();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

/// A `ws://` URL on which nothing listens.
pub async fn unreachable_ws_url() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("failed to reserve a local port")?;
    let addr = listener
        .local_addr()
        .context("failed to read reserved address")?;
    drop(listener);
    Ok(ws_url(addr))
}

fn ws_url(addr: SocketAddr) -> String {
    format!("ws://{addr}")
}

async fn serve_session(
    stream: TcpStream,
    state: Arc<ServerState>,
    mut heads: broadcast::Receiver<u64>,
    stop: CancellationToken,
    hush: CancellationToken,
) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let session = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
    let subscription_id = format!("0x{session:032x}");
    let (mut sink, mut source) = ws.split();
    let mut subscribed = false;

    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                let _ = sink.close().await;
                break;
            }
            _ = hush.cancelled() => {
                stop.cancelled().await;
                break;
            }
            inbound = source.next() => {
                let text = match inbound {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else {
                    continue;
                };
                let id = request.get("id").cloned().unwrap_or(Value::Null);
                let reply = match request.get("method").and_then(Value::as_str) {
                    Some("eth_subscribe") => {
                        subscribed = true;
                        state.subscriptions.fetch_add(1, Ordering::SeqCst);
                        json!({"jsonrpc": "2.0", "id": id, "result": subscription_id})
                    }
                    Some("eth_unsubscribe") => {
                        subscribed = false;
                        state.unsubscribes.fetch_add(1, Ordering::SeqCst);
                        json!({"jsonrpc": "2.0", "id": id, "result": true})
                    }
                    _ => json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32601, "message": "method not found"},
                    }),
                };
                if sink.send(Message::Text(reply.to_string().into())).await.is_err() {
                    break;
                }
            }
            head = heads.recv(), if subscribed => {
                let height = match head {
                    Ok(height) => height,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let notification = json!({
                    "jsonrpc": "2.0",
                    "method": "eth_subscription",
                    "params": {
                        "subscription": subscription_id,
                        "result": {
                            "number": format!("{height:#x}"),
                            "hash": block_hash(height),
                        },
                    },
                });
                if sink.send(Message::Text(notification.to_string().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}
