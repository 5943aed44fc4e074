use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use super::{closed_on_error, HistoricalProvider};
use crate::config::{credential, parse_options};
use crate::dates::{utc_seconds_z, DateNormalizer};
use crate::error::ProviderResult;
use crate::provider::ProviderContext;
use crate::transport::{HttpRequest, HttpTransport};
use crate::types::{Bar, BarTable, DataMode, HistoricalData, MarketStatus, ProviderKind};

#[derive(Debug, Clone, Deserialize)]
pub struct AlpacaHistoricalOptions {
    pub api_key_env: String,
    pub secret_key_env: String,
    /// Trading API base, used for the market clock.
    pub url: String,
    /// Market-data API base, used for bars.
    #[serde(default = "default_data_url")]
    pub data_url: String,
    pub symbol: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    pub feed: Option<String>,
    pub limit: Option<u32>,
}

fn default_data_url() -> String {
    "https://data.alpaca.markets".to_string()
}

fn default_timeframe() -> String {
    "1Min".to_string()
}

#[derive(Debug, Deserialize)]
struct BarsPage {
    #[serde(default)]
    bars: Option<Vec<AlpacaBar>>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlpacaBar {
    t: DateTime<Utc>,
    o: Decimal,
    h: Decimal,
    l: Decimal,
    c: Decimal,
    v: Decimal,
}

impl From<AlpacaBar> for Bar {
    fn from(b: AlpacaBar) -> Self {
        Bar { ts: b.t, open: b.o, high: b.h, low: b.l, close: b.c, volume: b.v }
    }
}

#[derive(Debug, Deserialize)]
struct Clock {
    is_open: bool,
}

pub struct AlpacaHistorical {
    ctx: ProviderContext,
    transport: Arc<dyn HttpTransport>,
    normalizer: DateNormalizer,
    api_key: String,
    secret_key: String,
    opts: AlpacaHistoricalOptions,
}

impl AlpacaHistorical {
    pub fn from_options(
        bag: &serde_json::Map<String, Value>,
        ctx: ProviderContext,
        transport: Arc<dyn HttpTransport>,
        normalizer: DateNormalizer,
    ) -> ProviderResult<Self> {
        let opts: AlpacaHistoricalOptions = parse_options(ProviderKind::Alpaca.as_str(), DataMode::Historical, bag)?;
        Self::new(opts, ctx, transport, normalizer)
    }

    pub fn new(
        opts: AlpacaHistoricalOptions,
        ctx: ProviderContext,
        transport: Arc<dyn HttpTransport>,
        normalizer: DateNormalizer,
    ) -> ProviderResult<Self> {
        let api_key = credential(&opts.api_key_env)?;
        let secret_key = credential(&opts.secret_key_env)?;
        tracing::info!(parent: &ctx.span, symbol = %opts.symbol, timeframe = %opts.timeframe, "AlpacaHistorical initialized");
        Ok(Self { ctx, transport, normalizer, api_key, secret_key, opts })
    }

    fn authed(&self, req: HttpRequest) -> HttpRequest {
        req.header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.secret_key)
    }

    async fn fetch_page(&self, start: &str, end: &str, page_token: Option<&str>) -> ProviderResult<BarsPage> {
        let url = format!("{}/v2/stocks/{}/bars", self.opts.data_url.trim_end_matches('/'), self.opts.symbol);
        let mut req = HttpRequest::get(url)
            .query("timeframe", &self.opts.timeframe)
            .query("start", start)
            .query("end", end);
        if let Some(feed) = &self.opts.feed {
            req = req.query("feed", feed);
        }
        if let Some(limit) = self.opts.limit {
            req = req.query("limit", limit);
        }
        if let Some(token) = page_token {
            req = req.query("page_token", token);
        }
        let resp = self.transport.send(self.authed(req)).await?.error_for_status()?;
        resp.json()
    }

    async fn clock(&self) -> ProviderResult<MarketStatus> {
        let url = format!("{}/v2/clock", self.opts.url.trim_end_matches('/'));
        let resp = self.transport.send(self.authed(HttpRequest::get(url))).await?.error_for_status()?;
        let clock: Clock = resp.json()?;
        Ok(MarketStatus { is_open: clock.is_open })
    }
}

#[async_trait]
impl HistoricalProvider for AlpacaHistorical {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Alpaca
    }

    async fn get_historical_data(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> ProviderResult<HistoricalData> {
        let range = self.normalizer.validate(start, end);
        let (start, end) = (utc_seconds_z(&range.start), utc_seconds_z(&range.end));
        tracing::info!(parent: &self.ctx.span, symbol = %self.opts.symbol, start = %start, end = %end, "fetching bars");

        let mut table = BarTable::default();
        let mut token: Option<String> = None;
        let mut pages = 0u32;
        loop {
            let page = self.fetch_page(&start, &end, token.as_deref()).await.map_err(|e| {
                tracing::error!(parent: &self.ctx.span, error = %e, "error fetching historical data");
                e
            })?;
            pages += 1;
            for bar in page.bars.unwrap_or_default() {
                table.push(bar.into());
            }
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(t) if token.as_deref() == Some(t.as_str()) => {
                    tracing::warn!(parent: &self.ctx.span, token = %t, pages, "page token repeated, stopping pagination");
                    break;
                }
                Some(t) => token = Some(t),
                None => break,
            }
        }

        if table.is_empty() {
            tracing::warn!(parent: &self.ctx.span, symbol = %self.opts.symbol, start = %start, end = %end, "no bars in range");
        }
        tracing::info!(parent: &self.ctx.span, bars = table.len(), pages, "historical data fetched");
        table.into_payload()
    }

    async fn is_market_open(&self) -> MarketStatus {
        closed_on_error(&self.ctx.span, self.clock().await)
    }
}
