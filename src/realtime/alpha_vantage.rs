use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::RealTimeProvider;
use crate::config::{credential, parse_options};
use crate::error::{ProviderError, ProviderResult};
use crate::provider::ProviderContext;
use crate::transport::{HttpRequest, HttpTransport};
use crate::types::{CloseInfo, DataMode, ProviderKind};

#[derive(Debug, Clone, Deserialize)]
pub struct AlphaVantageRealtimeOptions {
    pub api_key_env: String,
    pub symbol: String,
    pub function: String,
    pub interval: String,
    pub url: String,
}

/// Alpha Vantage has no stream; `connect` polls the REST endpoint once and
/// treats that response as the live payload.
pub struct AlphaVantageRealtime {
    ctx: ProviderContext,
    transport: Arc<dyn HttpTransport>,
    api_key: String,
    opts: AlphaVantageRealtimeOptions,
    last_payload: Option<Value>,
}

impl AlphaVantageRealtime {
    pub fn from_options(
        bag: &serde_json::Map<String, Value>,
        ctx: ProviderContext,
        transport: Arc<dyn HttpTransport>,
    ) -> ProviderResult<Self> {
        let opts: AlphaVantageRealtimeOptions =
            parse_options(ProviderKind::AlphaVantage.as_str(), DataMode::Realtime, bag)?;
        Self::new(opts, ctx, transport)
    }

    pub fn new(
        opts: AlphaVantageRealtimeOptions,
        ctx: ProviderContext,
        transport: Arc<dyn HttpTransport>,
    ) -> ProviderResult<Self> {
        let api_key = credential(&opts.api_key_env)?;
        tracing::info!(
            parent: &ctx.span,
            symbol = %opts.symbol,
            function = %opts.function,
            interval = %opts.interval,
            "AlphaVantageRealtime initialized"
        );
        Ok(Self {
            ctx,
            transport,
            api_key,
            opts,
            last_payload: None,
        })
    }

    pub fn last_payload(&self) -> Option<&Value> {
        self.last_payload.as_ref()
    }

    async fn fetch(&self, symbol: &str) -> ProviderResult<Value> {
        let req = HttpRequest::get(&self.opts.url)
            .query("function", &self.opts.function)
            .query("symbol", symbol)
            .query("interval", &self.opts.interval)
            .query("apikey", &self.api_key);
        let resp = self.transport.send(req).await?.error_for_status()?;
        let data: Value = resp.json()?;
        check_envelope(&data)?;
        Ok(data)
    }

    fn process_message(&self, data: &Value) {
        tracing::info!(parent: &self.ctx.span, data = %data, "received data");
    }
}

/// Alpha Vantage reports failures with a 200 and one of these keys.
pub(crate) fn check_envelope(data: &Value) -> ProviderResult<()> {
    for key in ["Error Message", "Note", "Information"] {
        if let Some(msg) = data.get(key).and_then(Value::as_str) {
            return Err(ProviderError::vendor("alpha_vantage", msg));
        }
    }
    Ok(())
}

#[async_trait]
impl RealTimeProvider for AlphaVantageRealtime {
    fn kind(&self) -> ProviderKind {
        ProviderKind::AlphaVantage
    }

    async fn connect(&mut self) -> ProviderResult<()> {
        let symbol = self.opts.symbol.clone();
        match self.fetch(&symbol).await {
            Ok(data) => {
                self.process_message(&data);
                self.last_payload = Some(data);
                Ok(())
            }
            Err(e) => {
                tracing::error!(parent: &self.ctx.span, error = %e, "error fetching real-time data");
                Err(e)
            }
        }
    }

    async fn subscribe(&mut self, _symbol: &str) -> ProviderResult<()> {
        tracing::info!(parent: &self.ctx.span, "subscription is not applicable for the Alpha Vantage REST API");
        Ok(())
    }

    async fn on_open(&mut self) -> ProviderResult<()> {
        tracing::info!(parent: &self.ctx.span, "open handler is not applicable for the Alpha Vantage REST API");
        Ok(())
    }

    async fn on_message(&mut self, _raw: &str) {
        tracing::info!(parent: &self.ctx.span, "message handler is not applicable for the Alpha Vantage REST API");
    }

    async fn on_error(&mut self, _error: &str) {
        tracing::error!(parent: &self.ctx.span, "error handler is not applicable for the Alpha Vantage REST API");
    }

    async fn on_close(&mut self, _close: Option<CloseInfo>) {
        tracing::info!(parent: &self.ctx.span, "close handler is not applicable for the Alpha Vantage REST API");
    }

    async fn disconnect(&mut self) -> ProviderResult<()> {
        tracing::info!(parent: &self.ctx.span, "AlphaVantageRealtime disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::stub::StubTransport;

    fn build(stub: Arc<StubTransport>) -> AlphaVantageRealtime {
        std::env::set_var("MARKET_FEED_TEST_AV_RT_KEY", "demo");
        let opts = AlphaVantageRealtimeOptions {
            api_key_env: "MARKET_FEED_TEST_AV_RT_KEY".into(),
            symbol: "IBM".into(),
            function: "TIME_SERIES_INTRADAY".into(),
            interval: "5min".into(),
            url: "https://www.alphavantage.co/query".into(),
        };
        AlphaVantageRealtime::new(opts, ProviderContext::new(ProviderKind::AlphaVantage, DataMode::Realtime), stub)
            .unwrap()
    }

    #[tokio::test]
    async fn connect_polls_once() {
        let stub = Arc::new(StubTransport::new().respond(200, r#"{"Meta Data":{},"Time Series (5min)":{}}"#));
        let mut p = build(stub.clone());

        p.connect().await.unwrap();

        let reqs = stub.requests();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].query_value("function"), Some("TIME_SERIES_INTRADAY"));
        assert_eq!(reqs[0].query_value("symbol"), Some("IBM"));
        assert_eq!(reqs[0].query_value("interval"), Some("5min"));
        assert_eq!(reqs[0].query_value("apikey"), Some("demo"));
        assert!(p.last_payload().unwrap().get("Time Series (5min)").is_some());
    }

    #[tokio::test]
    async fn vendor_envelope_fails_connect() {
        let stub = Arc::new(StubTransport::new().respond(200, r#"{"Note":"call frequency exceeded"}"#));
        let mut p = build(stub);
        let err = p.connect().await.unwrap_err();
        assert!(matches!(err, ProviderError::Vendor { ref message, .. } if message.contains("frequency")));
    }

    #[tokio::test]
    async fn streaming_callbacks_are_inert() {
        let stub = Arc::new(StubTransport::new());
        let mut p = build(stub.clone());
        p.subscribe("IBM").await.unwrap();
        p.on_open().await.unwrap();
        p.on_message("anything").await;
        p.on_error("boom").await;
        p.on_close(None).await;
        p.disconnect().await.unwrap();
        assert!(stub.requests().is_empty());
    }
}
