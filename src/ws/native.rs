//! Native transport: `tokio-tungstenite`.
//!
//! Each connection gets a pump task that owns the socket: it forwards text
//! frames and close/error notifications as [`TransportEvent`]s, answers pings,
//! and writes whatever the [`ChannelTransport`] hands it. Dropping the
//! transport closes the socket.
//!
//! When the socket goes away, text frames that were handed over but never
//! written are reported as [`TransportEvent::Undelivered`] so they can be
//! queued again.

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::WsError;
use crate::ws::transport::{Connection, Connector, Transport, TransportEvent};
use crate::ws::CLOSE_ABNORMAL;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens connections with `connect_async`, bounded by a handshake timeout.
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    connect_timeout: Duration,
}

impl TungsteniteConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TungsteniteConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl Connector for TungsteniteConnector {
    fn open(&self, url: &str) -> BoxFuture<'static, Result<Connection, WsError>> {
        let url = url.to_string();
        let timeout = self.connect_timeout;
        Box::pin(async move {
            let ws = attempt_connect(&url, timeout).await?;
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (event_tx, event_rx) = mpsc::unbounded_channel();
            tokio::spawn(pump(ws, out_rx, event_tx));
            Ok(Connection::new(ChannelTransport { tx: out_tx }, event_rx))
        })
    }
}

/// Write half backed by the pump task's inbox.
#[derive(Debug)]
struct ChannelTransport {
    tx: mpsc::UnboundedSender<Message>,
}

impl Transport for ChannelTransport {
    fn send(&mut self, frame: String) -> Result<(), WsError> {
        self.tx
            .send(Message::Text(frame.into()))
            .map_err(|_| WsError::SendFailed("Connection closed".into()))
    }

    fn close(&mut self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        if self.tx.send(Message::Close(Some(frame))).is_err() {
            tracing::debug!("Close requested on a finished connection");
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

async fn attempt_connect(url: &str, timeout: Duration) -> Result<WsStream, WsError> {
    let (ws_stream, _) = tokio::time::timeout(timeout, connect_async(url))
        .await
        .map_err(|_| WsError::Timeout)?
        .map_err(|e| WsError::ConnectionFailed(e.to_string()))?;
    Ok(ws_stream)
}

/// Runs until the socket closes or the transport is dropped.
async fn pump(
    ws: WsStream,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let _ = events.send(TransportEvent::Message(text.to_string()));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = extract_close(frame.as_ref());
                        finish(&mut outbound, &events, Vec::new(), code, reason);
                        let _ = sink.close().await;
                        return;
                    }
                    Some(Ok(_)) => {} // Binary, Pong, Frame: ignore
                    Some(Err(e)) => {
                        let reason = e.to_string();
                        tracing::error!("WebSocket error: {}", reason);
                        let _ = events.send(TransportEvent::Error(reason.clone()));
                        finish(&mut outbound, &events, Vec::new(), CLOSE_ABNORMAL, reason);
                        return;
                    }
                    None => {
                        finish(
                            &mut outbound,
                            &events,
                            Vec::new(),
                            CLOSE_ABNORMAL,
                            "Stream ended".into(),
                        );
                        return;
                    }
                }
            }

            out = outbound.recv() => {
                match out {
                    Some(msg) => {
                        let unsent: Vec<String> = text_of(&msg).into_iter().collect();
                        if let Err(e) = sink.send(msg).await {
                            let reason = e.to_string();
                            tracing::warn!("Send failed: {}", reason);
                            let _ = events.send(TransportEvent::Error(reason.clone()));
                            finish(&mut outbound, &events, unsent, CLOSE_ABNORMAL, reason);
                            return;
                        }
                    }
                    None => {
                        // Transport dropped.
                        let _ = sink.close().await;
                        return;
                    }
                }
            }
        }
    }
}

/// Report what never reached the socket, then the close.
///
/// Closes the inbox first, so later sends fail at the transport and stay in
/// the caller's queue.
fn finish(
    outbound: &mut mpsc::UnboundedReceiver<Message>,
    events: &mpsc::UnboundedSender<TransportEvent>,
    mut unsent: Vec<String>,
    code: u16,
    reason: String,
) {
    outbound.close();
    while let Ok(msg) = outbound.try_recv() {
        unsent.extend(text_of(&msg));
    }
    if !unsent.is_empty() {
        tracing::debug!("{} frame(s) not written", unsent.len());
        let _ = events.send(TransportEvent::Undelivered(unsent));
    }
    let _ = events.send(TransportEvent::Closed { code, reason });
}

fn text_of(msg: &Message) -> Option<String> {
    match msg {
        Message::Text(text) => Some(text.to_string()),
        _ => None,
    }
}

/// Extract close code and reason from an optional CloseFrame.
fn extract_close(frame: Option<&CloseFrame>) -> (u16, String) {
    match frame {
        Some(f) => (f.code.into(), f.reason.to_string()),
        None => (CLOSE_ABNORMAL, "No close frame".into()),
    }
}
