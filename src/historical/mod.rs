pub mod alpaca;
pub mod alpha_vantage;
pub mod coinbase;
pub mod interactive_brokers;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::Tz;

use crate::error::ProviderResult;
use crate::types::{HistoricalData, MarketStatus, ProviderKind};

pub use alpaca::AlpacaHistorical;
pub use alpha_vantage::AlphaVantageHistorical;
pub use coinbase::CoinbaseHistorical;
pub use interactive_brokers::IbHistorical;

/// Batch market-data source.
///
/// Both bounds are optional and run through [`crate::dates::DateNormalizer`]
/// before any request is built.
#[async_trait]
pub trait HistoricalProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn get_historical_data(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> ProviderResult<HistoricalData>;

    /// Never fails; a lookup error reads as closed.
    async fn is_market_open(&self) -> MarketStatus;
}

pub const SESSION_TZ: Tz = chrono_tz::America::New_York;

/// Regular US equity session, 09:30 to 16:00 New York time on weekdays.
/// Holidays are not modelled.
pub fn within_regular_session(at: DateTime<Utc>) -> bool {
    let local = at.with_timezone(&SESSION_TZ);
    if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }
    let hm = (local.hour(), local.minute());
    hm >= (9, 30) && hm < (16, 0)
}

/// Logs a failed status lookup and reports the market as closed.
pub(crate) fn closed_on_error(span: &tracing::Span, result: ProviderResult<MarketStatus>) -> MarketStatus {
    result.unwrap_or_else(|e| {
        tracing::error!(parent: span, error = %e, "market status lookup failed");
        MarketStatus::CLOSED
    })
}
