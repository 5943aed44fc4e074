use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::socket::{self, str_field, FrameHandler, SocketSession};
use super::RealTimeProvider;
use crate::config::parse_options;
use crate::error::{ProviderError, ProviderResult};
use crate::provider::ProviderContext;
use crate::stats::SessionStats;
use crate::types::{CloseInfo, DataMode, ProviderKind};
use crate::venue::coinbase::{CoinbaseSigner, WS_VERIFY_PATH};

#[derive(Debug, Clone, Deserialize)]
pub struct CoinbaseRealtimeOptions {
    pub url: String,
    pub sandbox_url: Option<String>,
    pub symbol: String,
    pub api_key_env: Option<String>,
    pub secret_key_env: Option<String>,
    pub passphrase_env: Option<String>,
    #[serde(default)]
    pub use_sandbox: bool,
}

/// Coinbase ticker channel for one product.
pub struct CoinbaseRealtime {
    ctx: ProviderContext,
    url: String,
    symbol: String,
    signer: Option<CoinbaseSigner>,
    socket: SocketSession,
}

impl CoinbaseRealtime {
    pub fn from_options(bag: &serde_json::Map<String, Value>, ctx: ProviderContext) -> ProviderResult<Self> {
        let opts: CoinbaseRealtimeOptions = parse_options(ProviderKind::CoinbasePro.as_str(), DataMode::Realtime, bag)?;
        Self::new(opts, ctx)
    }

    pub fn new(opts: CoinbaseRealtimeOptions, ctx: ProviderContext) -> ProviderResult<Self> {
        let signer = CoinbaseSigner::from_env(
            opts.api_key_env.as_deref(),
            opts.secret_key_env.as_deref(),
            opts.passphrase_env.as_deref(),
        )?;
        let url = match (opts.sandbox_url, opts.use_sandbox) {
            (Some(sandbox), true) => sandbox,
            _ => opts.url,
        };
        tracing::info!(parent: &ctx.span, url = %url, symbol = %opts.symbol, signed = signer.is_some(), "CoinbaseRealtime initialized");
        Ok(Self {
            ctx,
            url,
            symbol: opts.symbol,
            signer,
            socket: SocketSession::new(),
        })
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        self.socket.stats()
    }

    fn subscribe_frame(&self, symbol: &str, timestamp: i64) -> Value {
        let mut frame = json!({
            "type": "subscribe",
            "channels": [{ "name": "ticker", "product_ids": [symbol] }],
        });
        if let Some(signer) = &self.signer {
            let h = signer.headers(timestamp, "GET", WS_VERIFY_PATH);
            frame["key"] = json!(h.key);
            frame["signature"] = json!(h.signature);
            frame["timestamp"] = json!(h.timestamp);
            frame["passphrase"] = json!(h.passphrase);
        }
        frame
    }
}

#[async_trait]
impl FrameHandler for CoinbaseRealtime {
    fn socket(&mut self) -> &mut SocketSession {
        &mut self.socket
    }

    fn span(&self) -> &tracing::Span {
        &self.ctx.span
    }

    async fn process_message(&mut self, msg: Value) -> ProviderResult<()> {
        let kind = msg
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::vendor("coinbase_pro", format!("message without type: {}", msg)))?;

        match kind {
            "ticker" => {
                tracing::info!(
                    parent: &self.ctx.span,
                    product = str_field(&msg, "product_id"),
                    price = str_field(&msg, "price"),
                    best_bid = str_field(&msg, "best_bid"),
                    best_ask = str_field(&msg, "best_ask"),
                    time = str_field(&msg, "time"),
                    "ticker"
                );
            }
            "subscriptions" => {
                tracing::info!(parent: &self.ctx.span, channels = %msg.get("channels").cloned().unwrap_or_default(), "subscriptions confirmed");
            }
            "error" => {
                tracing::warn!(
                    parent: &self.ctx.span,
                    message = str_field(&msg, "message"),
                    reason = str_field(&msg, "reason"),
                    "feed error"
                );
            }
            _ => {
                tracing::info!(parent: &self.ctx.span, message = %msg, "received message");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RealTimeProvider for CoinbaseRealtime {
    fn kind(&self) -> ProviderKind {
        ProviderKind::CoinbasePro
    }

    async fn connect(&mut self) -> ProviderResult<()> {
        let url = self.url.clone();
        tracing::info!(parent: &self.ctx.span, url = %url, "connecting");
        let source = match self.socket.open(&url).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(parent: &self.ctx.span, error = %e, "error connecting to websocket");
                return Err(e);
            }
        };
        self.on_open().await?;
        socket::run(self, source).await
    }

    async fn subscribe(&mut self, symbol: &str) -> ProviderResult<()> {
        let frame = self.subscribe_frame(symbol, chrono::Utc::now().timestamp());
        self.socket.send_json(&frame).await?;
        tracing::info!(parent: &self.ctx.span, symbol, "subscribed to ticker");
        Ok(())
    }

    async fn on_open(&mut self) -> ProviderResult<()> {
        tracing::info!(parent: &self.ctx.span, "connection opened");
        let symbol = self.symbol.clone();
        self.subscribe(&symbol).await
    }

    async fn on_message(&mut self, raw: &str) {
        socket::dispatch_frame(self, raw).await;
    }

    async fn on_error(&mut self, error: &str) {
        tracing::error!(parent: &self.ctx.span, error, "websocket error");
    }

    async fn on_close(&mut self, close: Option<CloseInfo>) {
        tracing::info!(parent: &self.ctx.span, close = ?close, "connection closed");
    }

    async fn disconnect(&mut self) -> ProviderResult<()> {
        self.socket.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::test_support::capture_logs;
    use crate::stats::now_ms;
    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    fn options(url: String) -> CoinbaseRealtimeOptions {
        CoinbaseRealtimeOptions {
            url,
            sandbox_url: None,
            symbol: "BTC-USD".into(),
            api_key_env: None,
            secret_key_env: None,
            passphrase_env: None,
            use_sandbox: false,
        }
    }

    fn ctx() -> ProviderContext {
        ProviderContext::new(ProviderKind::CoinbasePro, DataMode::Realtime)
    }

    #[test]
    fn unsigned_subscribe_frame() {
        let p = CoinbaseRealtime::new(options("wss://x".into()), ctx()).unwrap();
        let f = p.subscribe_frame("ETH-USD", 1_700_000_000);
        assert_eq!(f["type"], "subscribe");
        assert_eq!(f["channels"][0]["name"], "ticker");
        assert_eq!(f["channels"][0]["product_ids"][0], "ETH-USD");
        assert!(f.get("signature").is_none());
    }

    #[test]
    fn signed_subscribe_frame_when_credentials_resolve() {
        std::env::set_var("MARKET_FEED_TEST_CB_RT_KEY", "key");
        std::env::set_var("MARKET_FEED_TEST_CB_RT_SECRET", "c2VjcmV0");
        std::env::set_var("MARKET_FEED_TEST_CB_RT_PASS", "pass");
        let mut o = options("wss://x".into());
        o.api_key_env = Some("MARKET_FEED_TEST_CB_RT_KEY".into());
        o.secret_key_env = Some("MARKET_FEED_TEST_CB_RT_SECRET".into());
        o.passphrase_env = Some("MARKET_FEED_TEST_CB_RT_PASS".into());

        let p = CoinbaseRealtime::new(o, ctx()).unwrap();
        let f = p.subscribe_frame("BTC-USD", 1_700_000_000);
        let expected = CoinbaseSigner::new("key", "c2VjcmV0", "pass")
            .unwrap()
            .sign("1700000000", "GET", WS_VERIFY_PATH, "");
        assert_eq!(f["signature"], expected);
        assert_eq!(f["timestamp"], "1700000000");
        assert_eq!(f["passphrase"], "pass");
    }

    #[test]
    fn sandbox_url_is_selected() {
        let mut o = options("wss://prod".into());
        o.sandbox_url = Some("wss://sandbox".into());
        o.use_sandbox = true;
        let p = CoinbaseRealtime::new(o, ctx()).unwrap();
        assert_eq!(p.url, "wss://sandbox");
    }

    #[tokio::test]
    async fn malformed_frame_does_not_end_session() {
        let (_guard, logs) = capture_logs();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let subscribe = ws.next().await.unwrap().unwrap().to_text().unwrap().to_string();

            ws.send(Message::Text("definitely not json".to_string().into())).await.unwrap();
            ws.send(Message::Text(
                r#"{"type":"ticker","product_id":"BTC-USD","price":"64000.01","best_bid":"64000.00","best_ask":"64000.02"}"#
                    .to_string()
                    .into(),
            ))
            .await
            .unwrap();
            ws.send(Message::Close(None)).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
            subscribe
        });

        let mut p = CoinbaseRealtime::new(options(format!("ws://{}", addr)), ctx()).unwrap();
        p.connect().await.unwrap();

        let subscribe: Value = serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(subscribe["channels"][0]["product_ids"][0], "BTC-USD");

        let snap = p.stats().snapshot(now_ms());
        assert_eq!(snap.frames_received, 2);
        assert_eq!(snap.frames_failed, 1);
        assert_eq!(snap.messages_dispatched, 1);
        assert_eq!(snap.frames_sent, 1);

        let out = logs.contents();
        assert!(out.contains("error processing message"), "{out}");
        assert!(out.contains("64000.01"), "{out}");
        assert!(out.contains("connection closed"), "{out}");
    }

    #[tokio::test]
    async fn message_without_type_counts_as_failure() {
        let mut p = CoinbaseRealtime::new(options("wss://x".into()), ctx()).unwrap();
        p.on_message(r#"{"product_id":"BTC-USD"}"#).await;
        assert_eq!(p.stats().snapshot(now_ms()).frames_failed, 1);
    }
}
