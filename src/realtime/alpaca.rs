use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::socket::{self, i64_field, str_field, FrameHandler, SocketSession};
use super::RealTimeProvider;
use crate::config::{credential, parse_options};
use crate::error::{ProviderError, ProviderResult};
use crate::provider::ProviderContext;
use crate::stats::SessionStats;
use crate::types::{CloseInfo, DataMode, ProviderKind};

#[derive(Debug, Clone, Deserialize)]
pub struct AlpacaRealtimeOptions {
    pub api_key_env: String,
    pub secret_key_env: String,
    /// Stream URL template; `{feed}` is replaced with `feed`.
    pub url: String,
    pub sandbox_url: Option<String>,
    #[serde(default = "default_feed")]
    pub feed: String,
    pub symbol: String,
    #[serde(default)]
    pub use_sandbox: bool,
}

fn default_feed() -> String {
    "iex".to_string()
}

impl AlpacaRealtimeOptions {
    pub fn ws_url(&self) -> String {
        let template = match (&self.sandbox_url, self.use_sandbox) {
            (Some(sandbox), true) => sandbox,
            _ => &self.url,
        };
        template.replace("{feed}", &self.feed)
    }
}

/// Alpaca market-data stream: authenticate on open, subscribe to bars once the
/// server confirms.
pub struct AlpacaRealtime {
    ctx: ProviderContext,
    api_key: String,
    secret_key: String,
    symbol: String,
    ws_url: String,
    socket: SocketSession,
    authenticated: bool,
}

impl AlpacaRealtime {
    pub fn from_options(bag: &serde_json::Map<String, Value>, ctx: ProviderContext) -> ProviderResult<Self> {
        let opts: AlpacaRealtimeOptions = parse_options(ProviderKind::Alpaca.as_str(), DataMode::Realtime, bag)?;
        Self::new(opts, ctx)
    }

    pub fn new(opts: AlpacaRealtimeOptions, ctx: ProviderContext) -> ProviderResult<Self> {
        let api_key = credential(&opts.api_key_env)?;
        let secret_key = credential(&opts.secret_key_env)?;
        let ws_url = opts.ws_url();
        tracing::info!(parent: &ctx.span, url = %ws_url, symbol = %opts.symbol, sandbox = opts.use_sandbox, "AlpacaRealtime initialized");
        Ok(Self {
            ctx,
            api_key,
            secret_key,
            symbol: opts.symbol,
            ws_url,
            socket: SocketSession::new(),
            authenticated: false,
        })
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        self.socket.stats()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }
}

#[async_trait]
impl FrameHandler for AlpacaRealtime {
    fn socket(&mut self) -> &mut SocketSession {
        &mut self.socket
    }

    fn span(&self) -> &tracing::Span {
        &self.ctx.span
    }

    async fn process_message(&mut self, msg: Value) -> ProviderResult<()> {
        let kind = msg
            .get("T")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::vendor("alpaca", format!("message without type: {}", msg)))?;

        match kind {
            "success" => {
                let text = str_field(&msg, "msg");
                tracing::info!(parent: &self.ctx.span, msg = text, "stream status");
                if text == "authenticated" && !self.authenticated {
                    let symbol = self.symbol.clone();
                    self.subscribe(&symbol).await?;
                    self.authenticated = true;
                }
            }
            "error" => {
                tracing::warn!(
                    parent: &self.ctx.span,
                    code = i64_field(&msg, "code"),
                    msg = str_field(&msg, "msg"),
                    "stream error"
                );
            }
            "subscription" => {
                tracing::info!(parent: &self.ctx.span, bars = %msg.get("bars").cloned().unwrap_or_default(), "subscription confirmed");
            }
            "b" => {
                tracing::info!(parent: &self.ctx.span, bar = %msg, "bar data");
            }
            other => {
                tracing::debug!(parent: &self.ctx.span, kind = other, message = %msg, "processing message");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RealTimeProvider for AlpacaRealtime {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Alpaca
    }

    async fn connect(&mut self) -> ProviderResult<()> {
        let url = self.ws_url.clone();
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
        let frame = json!({ "action": "subscribe", "bars": [symbol] });
        if let Err(e) = self.socket.send_json(&frame).await {
            tracing::error!(parent: &self.ctx.span, symbol, error = %e, "error subscribing");
            return Err(e);
        }
        tracing::info!(parent: &self.ctx.span, symbol, "subscribed to bars");
        Ok(())
    }

    async fn on_open(&mut self) -> ProviderResult<()> {
        tracing::info!(parent: &self.ctx.span, "websocket opened");
        let auth = json!({
            "action": "auth",
            "key": self.api_key,
            "secret": self.secret_key,
        });
        self.socket.send_json(&auth).await.map_err(|e| {
            tracing::error!(parent: &self.ctx.span, error = %e, "error during websocket open");
            e
        })
    }

    async fn on_message(&mut self, raw: &str) {
        socket::dispatch_frame(self, raw).await;
    }

    async fn on_error(&mut self, error: &str) {
        tracing::error!(parent: &self.ctx.span, error, "websocket error");
    }

    async fn on_close(&mut self, close: Option<CloseInfo>) {
        let (code, reason) = close.map(|c| (Some(c.code), c.reason)).unwrap_or((None, String::new()));
        tracing::info!(parent: &self.ctx.span, code = ?code, reason = %reason, "websocket closed");
    }

    async fn disconnect(&mut self) -> ProviderResult<()> {
        self.socket.close().await
    }
}
