//! WebSocket session shared by the socket-based providers.
//!
//! A provider owns a [`SocketSession`] (the write half plus counters) and hands
//! the read half to [`run`], which drives the receive loop until the peer
//! closes or the transport fails. There is no reconnect.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::RealTimeProvider;
use crate::error::{ProviderError, ProviderResult};
use crate::stats::{now_ms, SessionStats};
use crate::types::CloseInfo;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsSink = SplitSink<WsStream, Message>;
pub type WsSource = SplitStream<WsStream>;

#[derive(Default)]
pub struct SocketSession {
    sink: Option<WsSink>,
    stats: Arc<SessionStats>,
}

impl SocketSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        self.stats.clone()
    }

    /// Opens the socket and keeps the write half. Handshake errors propagate.
    pub async fn open(&mut self, url: &str) -> ProviderResult<WsSource> {
        let (ws, resp) = connect_async(url).await?;
        tracing::debug!(url, status = resp.status().as_u16(), "websocket handshake complete");
        let (sink, source) = ws.split();
        self.sink = Some(sink);
        self.stats.mark_opened(now_ms());
        Ok(source)
    }

    pub async fn send_text(&mut self, text: String) -> ProviderResult<()> {
        let sink = self.sink.as_mut().ok_or(ProviderError::NotConnected)?;
        sink.send(Message::Text(text.into())).await?;
        self.stats.inc_sent();
        Ok(())
    }

    pub async fn send_json<T: Serialize + ?Sized>(&mut self, msg: &T) -> ProviderResult<()> {
        let text = serde_json::to_string(msg)?;
        self.send_text(text).await
    }

    async fn pong(&mut self, payload: tokio_tungstenite::tungstenite::Bytes) -> ProviderResult<()> {
        let sink = self.sink.as_mut().ok_or(ProviderError::NotConnected)?;
        sink.send(Message::Pong(payload)).await?;
        Ok(())
    }

    /// Sends a close frame and drops the write half. Closing twice is a no-op.
    pub async fn close(&mut self) -> ProviderResult<()> {
        if let Some(mut sink) = self.sink.take() {
            sink.send(Message::Close(None)).await?;
            sink.close().await?;
        }
        Ok(())
    }

    fn release(&mut self) {
        self.sink = None;
    }
}

/// Message-level hooks the receive loop dispatches into.
#[async_trait]
pub trait FrameHandler: Send {
    fn socket(&mut self) -> &mut SocketSession;
    fn span(&self) -> &tracing::Span;
    async fn process_message(&mut self, msg: Value) -> ProviderResult<()>;
}

/// A frame is one JSON message or a JSON array of them.
pub fn parse_frame(raw: &str) -> Result<Vec<Value>, serde_json::Error> {
    Ok(match serde_json::from_str::<Value>(raw)? {
        Value::Array(items) => items,
        other => vec![other],
    })
}

/// String field of a vendor message, empty when absent or not a string.
pub fn str_field<'a>(msg: &'a Value, key: &str) -> &'a str {
    msg.get(key).and_then(Value::as_str).unwrap_or_default()
}

pub fn i64_field(msg: &Value, key: &str) -> i64 {
    msg.get(key).and_then(Value::as_i64).unwrap_or_default()
}

/// Parses `raw` and hands each message to the handler. Nothing escapes: parse
/// and handler failures are logged and counted.
pub async fn dispatch_frame<H: FrameHandler + ?Sized>(h: &mut H, raw: &str) {
    let stats = h.socket().stats();
    tracing::debug!(parent: h.span(), frame = raw, "frame received");

    let messages = match parse_frame(raw) {
        Ok(m) => m,
        Err(e) => {
            stats.inc_failed();
            tracing::error!(parent: h.span(), error = %e, "error processing message");
            return;
        }
    };

    let mut ok = 0u64;
    for msg in messages {
        match h.process_message(msg).await {
            Ok(()) => ok += 1,
            Err(e) => {
                stats.inc_failed();
                tracing::error!(parent: h.span(), error = %e, "error processing individual message");
            }
        }
    }
    stats.add_dispatched(ok);
}

/// Receive loop. Returns when the peer closes, the stream ends or the
/// transport fails; each case goes through the provider's callbacks first.
pub async fn run<P>(p: &mut P, mut source: WsSource) -> ProviderResult<()>
where
    P: RealTimeProvider + FrameHandler + ?Sized,
{
    loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => {
                p.socket().stats().inc_received();
                p.on_message(text.as_str()).await;
            }
            Some(Ok(Message::Binary(bytes))) => {
                p.socket().stats().inc_received();
                match std::str::from_utf8(&bytes) {
                    Ok(text) => p.on_message(text).await,
                    Err(e) => {
                        p.socket().stats().inc_failed();
                        tracing::error!(parent: p.span(), error = %e, "binary frame is not utf-8");
                    }
                }
            }
            Some(Ok(Message::Ping(payload))) => {
                if let Err(e) = p.socket().pong(payload).await {
                    tracing::warn!(parent: p.span(), error = %e, "failed to send pong");
                }
            }
            Some(Ok(Message::Close(frame))) => {
                p.socket().release();
                let info = frame.map(|f| CloseInfo {
                    code: u16::from(f.code),
                    reason: f.reason.to_string(),
                });
                p.on_close(info).await;
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                p.socket().release();
                p.on_error(&e.to_string()).await;
                break;
            }
            None => {
                p.socket().release();
                p.on_close(None).await;
                break;
            }
        }
    }

    let snap = p.socket().stats().snapshot(now_ms());
    tracing::info!(
        parent: p.span(),
        stats = %serde_json::to_string(&snap).unwrap_or_default(),
        "session ended"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_may_be_single_or_batch() {
        assert_eq!(parse_frame(r#"{"T":"b"}"#).unwrap().len(), 1);
        assert_eq!(parse_frame(r#"[{"T":"b"},{"T":"q"}]"#).unwrap().len(), 2);
        assert!(parse_frame("not json").is_err());
    }

    #[test]
    fn field_helpers_tolerate_missing_and_mistyped_keys() {
        let msg: Value = serde_json::from_str(r#"{"price":"64000.01","code":406,"n":1.5}"#).unwrap();
        assert_eq!(str_field(&msg, "price"), "64000.01");
        assert_eq!(str_field(&msg, "code"), "");
        assert_eq!(str_field(&msg, "missing"), "");
        assert_eq!(i64_field(&msg, "code"), 406);
        assert_eq!(i64_field(&msg, "n"), 0);
    }

    #[tokio::test]
    async fn sending_without_socket_is_not_connected() {
        let mut s = SocketSession::new();
        assert!(!s.is_open());
        assert!(matches!(s.send_text("x".into()).await, Err(ProviderError::NotConnected)));
        s.close().await.unwrap();
    }
}
