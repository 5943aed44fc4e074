use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::{closed_on_error, HistoricalProvider};
use crate::config::{credential, parse_options};
use crate::dates::DateNormalizer;
use crate::error::{ProviderError, ProviderResult};
use crate::provider::ProviderContext;
use crate::realtime::alpha_vantage::check_envelope;
use crate::transport::{HttpRequest, HttpTransport};
use crate::types::{DataMode, HistoricalData, MarketStatus, ProviderKind};

#[derive(Debug, Clone, Deserialize)]
pub struct AlphaVantageHistoricalOptions {
    pub api_key_env: String,
    pub symbol: String,
    pub function: String,
    pub interval: Option<String>,
    #[serde(default = "default_outputsize")]
    pub outputsize: String,
    pub url: String,
}

fn default_outputsize() -> String {
    "compact".to_string()
}

/// Finds the `Time Series (...)` object. Intraday and daily functions name it
/// differently, so only the prefix is fixed.
fn time_series(data: &Value) -> Option<&Value> {
    data.as_object()?
        .iter()
        .find(|(k, _)| k.starts_with("Time Series"))
        .map(|(_, v)| v)
}

pub struct AlphaVantageHistorical {
    ctx: ProviderContext,
    transport: Arc<dyn HttpTransport>,
    normalizer: DateNormalizer,
    api_key: String,
    opts: AlphaVantageHistoricalOptions,
}

impl AlphaVantageHistorical {
    pub fn from_options(
        bag: &serde_json::Map<String, Value>,
        ctx: ProviderContext,
        transport: Arc<dyn HttpTransport>,
        normalizer: DateNormalizer,
    ) -> ProviderResult<Self> {
        let opts: AlphaVantageHistoricalOptions =
            parse_options(ProviderKind::AlphaVantage.as_str(), DataMode::Historical, bag)?;
        Self::new(opts, ctx, transport, normalizer)
    }

    pub fn new(
        opts: AlphaVantageHistoricalOptions,
        ctx: ProviderContext,
        transport: Arc<dyn HttpTransport>,
        normalizer: DateNormalizer,
    ) -> ProviderResult<Self> {
        let api_key = credential(&opts.api_key_env)?;
        tracing::info!(parent: &ctx.span, symbol = %opts.symbol, function = %opts.function, "AlphaVantageHistorical initialized");
        Ok(Self { ctx, transport, normalizer, api_key, opts })
    }

    async fn query(&self, function: &str) -> ProviderResult<Value> {
        let mut req = HttpRequest::get(&self.opts.url)
            .query("function", function)
            .query("symbol", &self.opts.symbol);
        if let Some(interval) = &self.opts.interval {
            req = req.query("interval", interval);
        }
        let req = req.query("outputsize", &self.opts.outputsize).query("apikey", &self.api_key);
        let resp = self.transport.send(req).await?.error_for_status()?;
        let data: Value = resp.json()?;
        check_envelope(&data)?;
        Ok(data)
    }

    async fn intraday_status(&self) -> ProviderResult<MarketStatus> {
        let data = self.query("TIME_SERIES_INTRADAY").await?;
        Ok(MarketStatus { is_open: time_series(&data).is_some() })
    }
}

#[async_trait]
impl HistoricalProvider for AlphaVantageHistorical {
    fn kind(&self) -> ProviderKind {
        ProviderKind::AlphaVantage
    }

    async fn get_historical_data(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> ProviderResult<HistoricalData> {
        let range = self.normalizer.validate(start, end);
        tracing::debug!(
            parent: &self.ctx.span,
            symbol = %self.opts.symbol,
            start = %range.start.format("%Y-%m-%d"),
            end = %range.end.format("%Y-%m-%d"),
            "fetching time series"
        );

        let data = self.query(&self.opts.function).await.map_err(|e| {
            tracing::error!(parent: &self.ctx.span, error = %e, "error fetching historical data");
            e
        })?;
        match time_series(&data) {
            Some(series) => {
                tracing::info!(parent: &self.ctx.span, symbol = %self.opts.symbol, "historical data fetched");
                Ok(HistoricalData::Json(series.clone()))
            }
            None => {
                tracing::error!(parent: &self.ctx.span, response = %data, "response has no time series");
                Err(ProviderError::vendor("alpha_vantage", format!("no time series in response: {}", data)))
            }
        }
    }

    async fn is_market_open(&self) -> MarketStatus {
        closed_on_error(&self.ctx.span, self.intraday_status().await)
    }
}
