use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::socket::{self, i64_field, str_field, FrameHandler, SocketSession};
use super::RealTimeProvider;
use crate::config::parse_options;
use crate::error::{ProviderError, ProviderResult};
use crate::provider::ProviderContext;
use crate::stats::SessionStats;
use crate::transport::HttpTransport;
use crate::types::{CloseInfo, DataMode, ProviderKind};
use crate::venue::ib::{Gateway, GatewayAddr};

#[derive(Debug, Clone, Deserialize)]
pub struct IbRealtimeOptions {
    #[serde(flatten)]
    pub gateway: GatewayAddr,
    /// Defaults to the gateway base URL with a ws scheme and `/ws` appended.
    pub ws_url: Option<String>,
    pub symbol: String,
    pub conid: Option<i64>,
    #[serde(default = "default_fields")]
    pub fields: Vec<String>,
}

// last price, bid, ask
fn default_fields() -> Vec<String> {
    vec!["31".into(), "84".into(), "86".into()]
}

fn derive_ws_url(base_url: &str) -> String {
    let url = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base_url.to_string()
    };
    format!("{}/ws", url.trim_end_matches('/'))
}

/// Market-data stream through the Client Portal gateway.
///
/// Nothing touches the network until `connect`: the session token and the
/// contract id are fetched there.
pub struct IbRealtime {
    ctx: ProviderContext,
    gateway: Gateway,
    ws_url: String,
    symbol: String,
    fields: Vec<String>,
    configured_conid: Option<i64>,
    conid: Option<i64>,
    session_token: Option<String>,
    socket: SocketSession,
}

impl IbRealtime {
    pub fn from_options(
        bag: &serde_json::Map<String, Value>,
        ctx: ProviderContext,
        transport: Arc<dyn HttpTransport>,
    ) -> ProviderResult<Self> {
        let opts: IbRealtimeOptions =
            parse_options(ProviderKind::InteractiveBrokers.as_str(), DataMode::Realtime, bag)?;
        Self::new(opts, ctx, transport)
    }

    pub fn new(opts: IbRealtimeOptions, ctx: ProviderContext, transport: Arc<dyn HttpTransport>) -> ProviderResult<Self> {
        let base_url = opts.gateway.base_url()?;
        let ws_url = opts.ws_url.unwrap_or_else(|| derive_ws_url(&base_url));
        tracing::info!(parent: &ctx.span, gateway = %base_url, ws = %ws_url, symbol = %opts.symbol, "IbRealtime initialized");
        Ok(Self {
            ctx,
            gateway: Gateway::new(base_url, transport),
            ws_url,
            symbol: opts.symbol,
            fields: opts.fields,
            configured_conid: opts.conid,
            conid: None,
            session_token: None,
            socket: SocketSession::new(),
        })
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        self.socket.stats()
    }

    fn subscribe_command(&self, conid: i64) -> String {
        format!("smd+{}+{}", conid, json!({ "fields": self.fields }))
    }
}

#[async_trait]
impl FrameHandler for IbRealtime {
    fn socket(&mut self) -> &mut SocketSession {
        &mut self.socket
    }

    fn span(&self) -> &tracing::Span {
        &self.ctx.span
    }

    async fn process_message(&mut self, msg: Value) -> ProviderResult<()> {
        let topic = msg
            .get("topic")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::vendor("interactive_brokers", format!("message without topic: {}", msg)))?;

        if topic.starts_with("smd+") {
            tracing::info!(
                parent: &self.ctx.span,
                conid = i64_field(&msg, "conid"),
                last = str_field(&msg, "31"),
                bid = str_field(&msg, "84"),
                ask = str_field(&msg, "86"),
                "market data"
            );
            return Ok(());
        }

        match topic {
            "system" | "tic" => {
                tracing::debug!(parent: &self.ctx.span, message = %msg, "heartbeat");
            }
            "sts" => {
                tracing::info!(parent: &self.ctx.span, args = %msg.get("args").cloned().unwrap_or_default(), "gateway status");
            }
            "error" => {
                tracing::warn!(parent: &self.ctx.span, message = %msg, "gateway error");
            }
            other => {
                tracing::debug!(parent: &self.ctx.span, topic = other, message = %msg, "processing message");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RealTimeProvider for IbRealtime {
    fn kind(&self) -> ProviderKind {
        ProviderKind::InteractiveBrokers
    }

    async fn connect(&mut self) -> ProviderResult<()> {
        let token = self.gateway.session_token().await.map_err(|e| {
            tracing::error!(parent: &self.ctx.span, error = %e, "failed to obtain gateway session");
            e
        })?;
        let conid = self.gateway.contract_id(&self.symbol, self.configured_conid).await?;
        self.session_token = Some(token);
        self.conid = Some(conid);

        let url = self.ws_url.clone();
        tracing::info!(parent: &self.ctx.span, url = %url, conid, "connecting");
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
        let conid = match self.conid {
            Some(c) if symbol == self.symbol => c,
            _ => self.gateway.contract_id(symbol, None).await?,
        };
        let cmd = self.subscribe_command(conid);
        self.socket.send_text(cmd).await?;
        tracing::info!(parent: &self.ctx.span, symbol, conid, "subscribed to market data");
        Ok(())
    }

    async fn on_open(&mut self) -> ProviderResult<()> {
        tracing::info!(parent: &self.ctx.span, "connection opened");
        let token = self.session_token.clone().ok_or(ProviderError::NotConnected)?;
        self.socket.send_json(&json!({ "session": token })).await?;
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
        if let (Some(conid), true) = (self.conid, self.socket.is_open()) {
            self.socket.send_text(format!("umd+{}+{{}}", conid)).await?;
        }
        self.socket.close().await
    }
}
