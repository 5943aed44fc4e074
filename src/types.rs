use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Alpaca,
    AlphaVantage,
    InteractiveBrokers,
    CoinbasePro,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Alpaca,
        ProviderKind::AlphaVantage,
        ProviderKind::InteractiveBrokers,
        ProviderKind::CoinbasePro,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Alpaca => "alpaca",
            ProviderKind::AlphaVantage => "alpha_vantage",
            ProviderKind::InteractiveBrokers => "interactive_brokers",
            ProviderKind::CoinbasePro => "coinbase_pro",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ProviderError::UnknownProvider(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DataMode {
    Historical,
    Realtime,
}

impl DataMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataMode::Historical => "historical",
            DataMode::Realtime => "realtime",
        }
    }
}

/// What a historical fetch hands back.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoricalData {
    /// Column-oriented bar table, already serialized to JSON.
    Table(String),
    /// The vendor's response body, parsed.
    Json(serde_json::Value),
}

impl fmt::Display for HistoricalData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoricalData::Table(s) => f.write_str(s),
            HistoricalData::Json(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketStatus {
    pub is_open: bool,
}

impl MarketStatus {
    pub const CLOSED: MarketStatus = MarketStatus { is_open: false };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bar {
    pub ts: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BarTable {
    pub timestamp: Vec<String>,
    pub open: Vec<Decimal>,
    pub high: Vec<Decimal>,
    pub low: Vec<Decimal>,
    pub close: Vec<Decimal>,
    pub volume: Vec<Decimal>,
}

impl BarTable {
    pub fn len(&self) -> usize {
        self.timestamp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamp.is_empty()
    }

    pub fn push(&mut self, bar: Bar) {
        self.timestamp.push(bar.ts.to_rfc3339());
        self.open.push(bar.open);
        self.high.push(bar.high);
        self.low.push(bar.low);
        self.close.push(bar.close);
        self.volume.push(bar.volume);
    }

    pub fn into_payload(self) -> Result<HistoricalData, ProviderError> {
        Ok(HistoricalData::Table(serde_json::to_string(&self)?))
    }
}

impl FromIterator<Bar> for BarTable {
    fn from_iter<I: IntoIterator<Item = Bar>>(iter: I) -> Self {
        let mut t = BarTable::default();
        for b in iter {
            t.push(b);
        }
        t
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn provider_names_round_trip() {
        for k in ProviderKind::ALL {
            assert_eq!(k.as_str().parse::<ProviderKind>().unwrap(), k);
        }
    }

    #[test]
    fn unknown_provider_name_is_rejected() {
        let err = "binance".parse::<ProviderKind>().unwrap_err();
        assert!(matches!(err, ProviderError::UnknownProvider(ref n) if n == "binance"));
    }

    #[test]
    fn bar_table_is_column_oriented() {
        let table: BarTable = vec![
            Bar {
                ts: Utc.with_ymd_and_hms(2024, 5, 24, 13, 30, 0).unwrap(),
                open: dec!(1.5),
                high: dec!(2),
                low: dec!(1),
                close: dec!(1.75),
                volume: dec!(100),
            },
            Bar {
                ts: Utc.with_ymd_and_hms(2024, 5, 24, 13, 31, 0).unwrap(),
                open: dec!(1.75),
                high: dec!(1.8),
                low: dec!(1.7),
                close: dec!(1.7),
                volume: dec!(40),
            },
        ]
        .into_iter()
        .collect();

        assert_eq!(table.len(), 2);
        assert!(!table.is_empty());
        assert!(BarTable::default().is_empty());
        let v: serde_json::Value = match table.into_payload().unwrap() {
            HistoricalData::Table(s) => serde_json::from_str(&s).unwrap(),
            other => panic!("unexpected payload {other:?}"),
        };
        assert_eq!(v["open"], serde_json::json!(["1.5", "1.75"]));
        assert_eq!(v["timestamp"][1], "2024-05-24T13:31:00+00:00");
    }
}
