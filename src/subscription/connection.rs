//! WebSocket session carrying one `newHeads` subscription.

use super::frames::{decode_frame, subscribe_request, unsubscribe_request, InboundFrame};
use crate::error::IngestError;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type WsSource = SplitStream<WsStream>;
type WsSink = SplitSink<WsStream, Message>;

const SUBSCRIBE_REQUEST_ID: u64 = 1;

/// An open transport with a confirmed subscription.
///
/// The read half is handed to the supervisor's read loop; the write half is
/// shared by the health probe and `close`.
pub struct HeadSession {
    subscription_id: String,
    writer: SessionWriter,
    reader: Option<WsSource>,
}

impl HeadSession {
    /// Connects, issues `eth_subscribe(["newHeads"])`, and waits for the
    /// acknowledgement carrying the subscription id, all within
    /// `handshake_timeout`.
    pub async fn open(endpoint: &str, handshake_timeout: Duration) -> Result<Self, IngestError> {
        let handshake = async {
            let (mut stream, _) = connect_async(endpoint)
                .await
                .map_err(|err| IngestError::Connection(format!("connect to {endpoint}: {err}")))?;

            stream
                .send(Message::Text(subscribe_request(SUBSCRIBE_REQUEST_ID).into()))
                .await
                .map_err(|err| IngestError::Connection(format!("send subscribe: {err}")))?;

            let subscription_id = await_subscription_ack(&mut stream).await?;
            Ok::<_, IngestError>((stream, subscription_id))
        };

        let (stream, subscription_id) = timeout(handshake_timeout, handshake)
            .await
            .map_err(|_| {
                IngestError::Connection(format!(
                    "handshake with {endpoint} timed out after {handshake_timeout:?}"
                ))
            })??;

        let (sink, source) = stream.split();
        tracing::info!(
            endpoint,
            subscription = %subscription_id,
            "push subscription confirmed"
        );

        Ok(Self {
            subscription_id,
            writer: SessionWriter {
                sink: Arc::new(Mutex::new(sink)),
                next_request_id: Arc::new(AtomicU64::new(SUBSCRIBE_REQUEST_ID + 1)),
            },
            reader: Some(source),
        })
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub(crate) fn writer(&self) -> SessionWriter {
        self.writer.clone()
    }

    pub(crate) fn take_reader(&mut self) -> Option<WsSource> {
        self.reader.take()
    }

    /// Best-effort unsubscribe followed by a close frame. Errors are logged only.
    pub async fn close(&self) {
        let request = unsubscribe_request(self.writer.next_id(), &self.subscription_id);
        if let Err(err) = self.writer.send_text(request).await {
            tracing::debug!(error = %err, "unsubscribe request not delivered");
        }
        if let Err(err) = self.writer.close().await {
            tracing::debug!(error = %err, "websocket close did not complete cleanly");
        }
    }
}

async fn await_subscription_ack(stream: &mut WsStream) -> Result<String, IngestError> {
    while let Some(message) = stream.next().await {
        let message =
            message.map_err(|err| IngestError::Connection(format!("read during handshake: {err}")))?;
        let Message::Text(text) = message else {
            if let Message::Close(_) = message {
                return Err(IngestError::Connection(
                    "connection closed during handshake".to_string(),
                ));
            }
            continue;
        };

        match decode_frame(text.as_str(), None) {
            InboundFrame::Response { id, result } if id == SUBSCRIBE_REQUEST_ID => {
                return match result {
                    Value::String(subscription) if !subscription.is_empty() => Ok(subscription),
                    other => Err(IngestError::Connection(format!(
                        "subscribe acknowledgement carried no subscription id: {other}"
                    ))),
                };
            }
            InboundFrame::ErrorResponse { id, message }
                if id.is_none() || id == Some(SUBSCRIBE_REQUEST_ID) =>
            {
                return Err(IngestError::Connection(format!(
                    "subscribe rejected: {message}"
                )));
            }
            other => {
                tracing::trace!(frame = ?other, "ignoring frame while awaiting subscribe ack");
            }
        }
    }

    Err(IngestError::Connection(
        "connection closed during handshake".to_string(),
    ))
}

/// Shared write half of a session.
#[derive(Clone)]
pub(crate) struct SessionWriter {
    sink: Arc<Mutex<WsSink>>,
    next_request_id: Arc<AtomicU64>,
}

impl SessionWriter {
    fn next_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) async fn ping(&self) -> Result<(), IngestError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Ping(Default::default()))
            .await
            .map_err(|err| IngestError::Connection(format!("health probe failed: {err}")))
    }

    async fn send_text(&self, text: String) -> Result<(), IngestError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text.into()))
            .await
            .map_err(|err| IngestError::Connection(format!("send failed: {err}")))
    }

    async fn close(&self) -> Result<(), IngestError> {
        let mut sink = self.sink.lock().await;
        sink.close()
            .await
            .map_err(|err| IngestError::Connection(format!("close failed: {err}")))
    }
}
