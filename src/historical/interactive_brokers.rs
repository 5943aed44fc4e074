use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use super::{within_regular_session, HistoricalProvider};
use crate::config::parse_options;
use crate::dates::DateNormalizer;
use crate::error::{ProviderError, ProviderResult};
use crate::provider::ProviderContext;
use crate::transport::{HttpRequest, HttpTransport};
use crate::types::{Bar, BarTable, DataMode, HistoricalData, MarketStatus, ProviderKind};
use crate::venue::ib::{Gateway, GatewayAddr};

#[derive(Debug, Clone, Deserialize)]
pub struct IbHistoricalOptions {
    #[serde(flatten)]
    pub gateway: GatewayAddr,
    pub symbol: String,
    pub conid: Option<i64>,
    /// Look-back window in gateway notation, e.g. `1d`, `2w`.
    pub duration: String,
    /// Bar width in gateway notation, e.g. `5min`, `1h`.
    pub bar_size: String,
    #[serde(default)]
    pub outside_rth: bool,
}

#[derive(Debug, Deserialize)]
struct HistoryResp {
    #[serde(default)]
    data: Vec<HistoryBar>,
}

#[derive(Debug, Deserialize)]
struct HistoryBar {
    /// epoch milliseconds
    t: i64,
    o: Decimal,
    h: Decimal,
    l: Decimal,
    c: Decimal,
    #[serde(default)]
    v: Decimal,
}

impl TryFrom<HistoryBar> for Bar {
    type Error = ProviderError;

    fn try_from(b: HistoryBar) -> Result<Self, Self::Error> {
        let ts = DateTime::from_timestamp_millis(b.t)
            .ok_or_else(|| ProviderError::vendor("interactive_brokers", format!("bar timestamp out of range: {}", b.t)))?;
        Ok(Bar { ts, open: b.o, high: b.h, low: b.l, close: b.c, volume: b.v })
    }
}

/// Historical bars through the Client Portal gateway. Construction performs
/// no I/O; the contract id is resolved on the first fetch.
pub struct IbHistorical {
    ctx: ProviderContext,
    gateway: Gateway,
    normalizer: DateNormalizer,
    opts: IbHistoricalOptions,
}

impl IbHistorical {
    pub fn from_options(
        bag: &serde_json::Map<String, Value>,
        ctx: ProviderContext,
        transport: Arc<dyn HttpTransport>,
        normalizer: DateNormalizer,
    ) -> ProviderResult<Self> {
        let opts: IbHistoricalOptions =
            parse_options(ProviderKind::InteractiveBrokers.as_str(), DataMode::Historical, bag)?;
        Self::new(opts, ctx, transport, normalizer)
    }

    pub fn new(
        opts: IbHistoricalOptions,
        ctx: ProviderContext,
        transport: Arc<dyn HttpTransport>,
        normalizer: DateNormalizer,
    ) -> ProviderResult<Self> {
        let base_url = opts.gateway.base_url()?;
        tracing::info!(
            parent: &ctx.span,
            gateway = %base_url,
            symbol = %opts.symbol,
            duration = %opts.duration,
            bar_size = %opts.bar_size,
            "IbHistorical initialized"
        );
        Ok(Self {
            ctx,
            gateway: Gateway::new(base_url, transport),
            normalizer,
            opts,
        })
    }

    async fn fetch(&self, end: DateTime<Utc>) -> ProviderResult<BarTable> {
        let conid = self.gateway.contract_id(&self.opts.symbol, self.opts.conid).await?;
        let req = HttpRequest::get(self.gateway.endpoint("/iserver/marketdata/history"))
            .query("conid", conid)
            .query("period", &self.opts.duration)
            .query("bar", &self.opts.bar_size)
            .query("startTime", end.format("%Y%m%d-%H:%M:%S"))
            .query("outsideRth", self.opts.outside_rth);
        let history: HistoryResp = self.gateway.send(req).await?.json()?;
        history.data.into_iter().map(Bar::try_from).collect()
    }
}

#[async_trait]
impl HistoricalProvider for IbHistorical {
    fn kind(&self) -> ProviderKind {
        ProviderKind::InteractiveBrokers
    }

    async fn get_historical_data(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> ProviderResult<HistoricalData> {
        let range = self.normalizer.validate(start, end);
        tracing::debug!(parent: &self.ctx.span, start = %range.start, end = %range.end, "validated dates");

        match self.fetch(range.end_utc()).await {
            Ok(table) => {
                tracing::info!(parent: &self.ctx.span, symbol = %self.opts.symbol, bars = table.len(), "historical data fetched");
                table.into_payload()
            }
            Err(e) => {
                tracing::error!(parent: &self.ctx.span, symbol = %self.opts.symbol, error = %e, "error fetching historical data");
                Err(e)
            }
        }
    }

    async fn is_market_open(&self) -> MarketStatus {
        MarketStatus { is_open: within_regular_session(Utc::now()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::stub::StubTransport;
    use chrono::TimeZone;
    use serde_json::json;

    fn provider(stub: Arc<StubTransport>, conid: Option<i64>) -> IbHistorical {
        let opts = IbHistoricalOptions {
            gateway: GatewayAddr { url: Some("https://localhost:5000/v1/api".into()), host: None, port: None },
            symbol: "AAPL".into(),
            conid,
            duration: "1d".into(),
            bar_size: "5min".into(),
            outside_rth: false,
        };
        IbHistorical::new(
            opts,
            ProviderContext::new(ProviderKind::InteractiveBrokers, DataMode::Historical),
            stub,
            DateNormalizer::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn history_request_and_table() {
        let stub = Arc::new(
            StubTransport::new()
                .respond(200, r#"[{"conid":"265598"}]"#)
                .respond(
                    200,
                    r#"{"symbol":"AAPL","data":[{"t":1716557400000,"o":189.5,"c":189.9,"h":190.0,"l":189.4,"v":1200},{"t":1716557700000,"o":189.9,"c":190.1,"h":190.2,"l":189.8,"v":900}]}"#,
                ),
        );
        let p = provider(stub.clone(), None);

        let start = Utc.with_ymd_and_hms(2024, 5, 23, 20, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 5, 24, 20, 0, 0).unwrap();
        let data = p.get_historical_data(Some(start), Some(end)).await.unwrap();

        let reqs = stub.requests();
        assert_eq!(reqs.len(), 2);
        let req = &reqs[1];
        assert_eq!(req.url, "https://localhost:5000/v1/api/iserver/marketdata/history");
        assert_eq!(req.query_value("conid"), Some("265598"));
        assert_eq!(req.query_value("period"), Some("1d"));
        assert_eq!(req.query_value("bar"), Some("5min"));
        assert_eq!(req.query_value("startTime"), Some("20240524-20:00:00"));
        assert_eq!(req.query_value("outsideRth"), Some("false"));

        let HistoricalData::Table(json) = data else { panic!("expected table") };
        let v: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["timestamp"][0], json!("2024-05-24T13:30:00+00:00"));
        assert_eq!(v["close"][1], "190.1");
    }

    #[tokio::test]
    async fn gateway_error_propagates() {
        let stub = Arc::new(StubTransport::new().respond(503, "gateway down"));
        let p = provider(stub.clone(), Some(265598));
        let err = p.get_historical_data(None, None).await.unwrap_err();
        assert!(matches!(err, ProviderError::Http { status: 503, .. }));
        assert_eq!(stub.requests().len(), 1);
    }

    #[test]
    fn construction_does_no_io() {
        let stub = Arc::new(StubTransport::new());
        let _ = provider(stub.clone(), None);
        assert!(stub.requests().is_empty());
    }
}
