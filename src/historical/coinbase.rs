use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::{closed_on_error, within_regular_session, HistoricalProvider};
use crate::config::parse_options;
use crate::dates::{utc_rfc3339, DateNormalizer};
use crate::error::{ProviderError, ProviderResult};
use crate::provider::ProviderContext;
use crate::transport::{HttpRequest, HttpTransport};
use crate::types::{DataMode, HistoricalData, MarketStatus, ProviderKind};
use crate::venue::coinbase::CoinbaseSigner;

/// Candle widths the exchange accepts, in seconds.
pub const SUPPORTED_GRANULARITIES: &[u32] = &[60, 300, 900, 3600, 21600, 86400];

#[derive(Debug, Clone, Deserialize)]
pub struct CoinbaseHistoricalOptions {
    pub url: String,
    pub sandbox_url: Option<String>,
    pub symbol: String,
    pub granularity: u32,
    pub api_key_env: Option<String>,
    pub secret_key_env: Option<String>,
    pub passphrase_env: Option<String>,
    #[serde(default)]
    pub use_sandbox: bool,
}

#[derive(Debug, Deserialize)]
struct ServerTime {
    iso: DateTime<Utc>,
}

pub struct CoinbaseHistorical {
    ctx: ProviderContext,
    transport: Arc<dyn HttpTransport>,
    normalizer: DateNormalizer,
    url: String,
    symbol: String,
    granularity: u32,
    signer: Option<CoinbaseSigner>,
}

impl CoinbaseHistorical {
    pub fn from_options(
        bag: &serde_json::Map<String, Value>,
        ctx: ProviderContext,
        transport: Arc<dyn HttpTransport>,
        normalizer: DateNormalizer,
    ) -> ProviderResult<Self> {
        let opts: CoinbaseHistoricalOptions =
            parse_options(ProviderKind::CoinbasePro.as_str(), DataMode::Historical, bag)?;
        Self::new(opts, ctx, transport, normalizer)
    }

    pub fn new(
        opts: CoinbaseHistoricalOptions,
        ctx: ProviderContext,
        transport: Arc<dyn HttpTransport>,
        normalizer: DateNormalizer,
    ) -> ProviderResult<Self> {
        if !SUPPORTED_GRANULARITIES.contains(&opts.granularity) {
            return Err(ProviderError::UnsupportedGranularity {
                granularity: opts.granularity,
                supported: SUPPORTED_GRANULARITIES,
            });
        }
        let signer = CoinbaseSigner::from_env(
            opts.api_key_env.as_deref(),
            opts.secret_key_env.as_deref(),
            opts.passphrase_env.as_deref(),
        )?;
        let url = match (opts.sandbox_url, opts.use_sandbox) {
            (Some(sandbox), true) => sandbox,
            _ => opts.url,
        };
        let url = url.trim_end_matches('/').to_string();
        tracing::info!(
            parent: &ctx.span,
            url = %url,
            symbol = %opts.symbol,
            granularity = opts.granularity,
            signed = signer.is_some(),
            "CoinbaseHistorical initialized"
        );
        Ok(Self {
            ctx,
            transport,
            normalizer,
            url,
            symbol: opts.symbol,
            granularity: opts.granularity,
            signer,
        })
    }

    /// Adds `CB-ACCESS-*` headers when credentials are configured. The signed
    /// path carries the query string encoded the way the HTTP client sends it.
    fn sign(&self, req: HttpRequest, timestamp: i64) -> ProviderResult<HttpRequest> {
        let Some(signer) = &self.signer else {
            return Ok(req);
        };
        let url = reqwest::Url::parse_with_params(&req.url, &req.query)
            .map_err(|e| ProviderError::Config(format!("invalid url {}: {}", req.url, e)))?;
        let path = match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_string(),
        };
        let h = signer.headers(timestamp, req.method.as_str(), &path);
        Ok(req
            .header("CB-ACCESS-KEY", h.key)
            .header("CB-ACCESS-SIGN", h.signature)
            .header("CB-ACCESS-TIMESTAMP", h.timestamp)
            .header("CB-ACCESS-PASSPHRASE", h.passphrase))
    }

    async fn server_time(&self) -> ProviderResult<DateTime<Utc>> {
        let resp = self
            .transport
            .send(HttpRequest::get(format!("{}/time", self.url)))
            .await?
            .error_for_status()?;
        let t: ServerTime = resp.json()?;
        Ok(t.iso)
    }
}

#[async_trait]
impl HistoricalProvider for CoinbaseHistorical {
    fn kind(&self) -> ProviderKind {
        ProviderKind::CoinbasePro
    }

    async fn get_historical_data(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> ProviderResult<HistoricalData> {
        let range = self.normalizer.validate(start, end);
        let req = HttpRequest::get(format!("{}/products/{}/candles", self.url, self.symbol))
            .query("start", utc_rfc3339(&range.start))
            .query("end", utc_rfc3339(&range.end))
            .query("granularity", self.granularity);
        let req = self.sign(req, Utc::now().timestamp())?;

        let resp = match self.transport.send(req).await.and_then(|r| r.error_for_status()) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(parent: &self.ctx.span, error = %e, "error fetching historical data");
                return Err(e);
            }
        };
        let candles: Value = resp.json()?;
        tracing::info!(
            parent: &self.ctx.span,
            symbol = %self.symbol,
            candles = candles.as_array().map(Vec::len).unwrap_or_default(),
            "historical data fetched"
        );
        Ok(HistoricalData::Json(candles))
    }

    async fn is_market_open(&self) -> MarketStatus {
        let status = self.server_time().await.map(|t| MarketStatus { is_open: within_regular_session(t) });
        closed_on_error(&self.ctx.span, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::stub::StubTransport;
    use chrono::TimeZone;

    fn options(granularity: u32) -> CoinbaseHistoricalOptions {
        CoinbaseHistoricalOptions {
            url: "https://api.exchange.coinbase.com".into(),
            sandbox_url: Some("https://api-public.sandbox.exchange.coinbase.com".into()),
            symbol: "BTC-USD".into(),
            granularity,
            api_key_env: None,
            secret_key_env: None,
            passphrase_env: None,
            use_sandbox: false,
        }
    }

    fn build(opts: CoinbaseHistoricalOptions, stub: Arc<StubTransport>) -> ProviderResult<CoinbaseHistorical> {
        CoinbaseHistorical::new(
            opts,
            ProviderContext::new(ProviderKind::CoinbasePro, DataMode::Historical),
            stub,
            DateNormalizer::new(),
        )
    }

    #[test]
    fn granularity_is_checked_at_construction() {
        let err = build(options(61), Arc::new(StubTransport::new())).err().unwrap();
        assert!(matches!(err, ProviderError::UnsupportedGranularity { granularity: 61, .. }));
        assert!(err.is_configuration());

        assert!(build(options(3600), Arc::new(StubTransport::new())).is_ok());
    }

    #[tokio::test]
    async fn candles_request_uses_rfc3339_range() {
        let stub = Arc::new(StubTransport::new().respond(200, "[[1716559200,64000.1,64100.5,64010.0,64050.2,12.5]]"));
        let p = build(options(3600), stub.clone()).unwrap();

        let start = Utc.with_ymd_and_hms(2024, 5, 20, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 5, 21, 0, 0, 0).unwrap();
        let data = p.get_historical_data(Some(start), Some(end)).await.unwrap();

        let HistoricalData::Json(v) = data else { panic!("expected json") };
        assert_eq!(v[0][4], 64050.2);

        let req = &stub.requests()[0];
        assert_eq!(req.url, "https://api.exchange.coinbase.com/products/BTC-USD/candles");
        assert_eq!(req.query_value("start"), Some("2024-05-20T00:00:00Z"));
        assert_eq!(req.query_value("end"), Some("2024-05-21T00:00:00Z"));
        assert_eq!(req.query_value("granularity"), Some("3600"));
        assert_eq!(req.header_value("CB-ACCESS-SIGN"), None);
    }

    #[tokio::test]
    async fn signed_request_when_credentials_resolve() {
        std::env::set_var("MARKET_FEED_TEST_CB_HIST_KEY", "key");
        std::env::set_var("MARKET_FEED_TEST_CB_HIST_SECRET", "c2VjcmV0");
        std::env::set_var("MARKET_FEED_TEST_CB_HIST_PASS", "pass");
        let mut o = options(300);
        o.api_key_env = Some("MARKET_FEED_TEST_CB_HIST_KEY".into());
        o.secret_key_env = Some("MARKET_FEED_TEST_CB_HIST_SECRET".into());
        o.passphrase_env = Some("MARKET_FEED_TEST_CB_HIST_PASS".into());
        o.use_sandbox = true;

        let stub = Arc::new(StubTransport::new().respond(200, "[]"));
        let p = build(o, stub.clone()).unwrap();
        let start = Utc.with_ymd_and_hms(2024, 5, 20, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 5, 20, 6, 0, 0).unwrap();
        p.get_historical_data(Some(start), Some(end)).await.unwrap();

        let req = &stub.requests()[0];
        assert!(req.url.starts_with("https://api-public.sandbox.exchange.coinbase.com/"));
        let ts = req.header_value("CB-ACCESS-TIMESTAMP").unwrap();
        let expected = CoinbaseSigner::new("key", "c2VjcmV0", "pass").unwrap().sign(
            ts,
            "GET",
            "/products/BTC-USD/candles?start=2024-05-20T00%3A00%3A00Z&end=2024-05-20T06%3A00%3A00Z&granularity=300",
            "",
        );
        assert_eq!(req.header_value("CB-ACCESS-SIGN"), Some(expected.as_str()));
        assert_eq!(req.header_value("CB-ACCESS-KEY"), Some("key"));
        assert_eq!(req.header_value("CB-ACCESS-PASSPHRASE"), Some("pass"));
    }

    #[tokio::test]
    async fn market_status_from_server_time() {
        let stub = Arc::new(
            StubTransport::new()
                // Friday 11:00 New York
                .respond(200, r#"{"iso":"2024-05-24T15:00:00.000Z","epoch":1716562800.0}"#)
                // Friday 20:00 New York
                .respond(200, r#"{"iso":"2024-05-25T00:00:00.000Z","epoch":1716595200.0}"#)
                .respond(502, "bad gateway"),
        );
        let p = build(options(60), stub.clone()).unwrap();
        assert!(p.is_market_open().await.is_open);
        assert!(!p.is_market_open().await.is_open);
        assert!(!p.is_market_open().await.is_open);
        assert_eq!(stub.requests()[0].url, "https://api.exchange.coinbase.com/time");
    }
}
