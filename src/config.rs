use std::path::Path;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{ProviderError, ProviderResult};
use crate::types::DataMode;

/// Process settings read from the environment (and `.env`).
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_provider_name")]
    pub provider_name: String,
    #[serde(default = "default_config_path")]
    pub config_path: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    // Optional range handed to historical fetches, RFC 3339.
    pub historical_start: Option<String>,
    pub historical_end: Option<String>,

    /// Look up market status before a historical fetch. Off by default.
    #[serde(default)]
    pub check_market_status: bool,
}

fn default_provider_name() -> String {
    "binance".to_string()
}

fn default_config_path() -> String {
    "config/config.json".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let c = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;
        Ok(c.try_deserialize()?)
    }

    pub fn historical_range(&self) -> anyhow::Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
        Ok((
            parse_opt_instant(&self.historical_start)?,
            parse_opt_instant(&self.historical_end)?,
        ))
    }
}

fn parse_opt_instant(s: &Option<String>) -> anyhow::Result<Option<DateTime<Utc>>> {
    Ok(match s {
        Some(v) if !v.trim().is_empty() => {
            Some(DateTime::parse_from_rfc3339(v.trim())?.with_timezone(&Utc))
        }
        _ => None,
    })
}

/// One entry of the provider configuration file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProviderRecord {
    pub provider: String,
    #[serde(default)]
    pub realtime: Map<String, Value>,
    #[serde(default)]
    pub historical: Map<String, Value>,
}

impl ProviderRecord {
    pub fn options(&self, mode: DataMode) -> &Map<String, Value> {
        match mode {
            DataMode::Realtime => &self.realtime,
            DataMode::Historical => &self.historical,
        }
    }
}

/// Reads the JSON array at `path` and returns the record for `provider_name`.
pub fn load_provider_record(path: impl AsRef<Path>, provider_name: &str) -> ProviderResult<ProviderRecord> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ProviderError::Config(format!("read {}: {}", path.display(), e)))?;
    find_record(&raw, provider_name)
}

pub fn find_record(raw: &str, provider_name: &str) -> ProviderResult<ProviderRecord> {
    let records: Vec<ProviderRecord> = serde_json::from_str(raw)
        .map_err(|e| ProviderError::Config(format!("parse provider records: {}", e)))?;
    records
        .into_iter()
        .find(|r| r.provider == provider_name)
        .ok_or_else(|| ProviderError::MissingRecord(provider_name.to_string()))
}

/// Deserializes a provider's option bag into its typed options.
pub fn parse_options<T: DeserializeOwned>(
    provider: &str,
    mode: DataMode,
    bag: &Map<String, Value>,
) -> ProviderResult<T> {
    serde_json::from_value(Value::Object(bag.clone())).map_err(|e| ProviderError::InvalidOptions {
        provider: provider.to_string(),
        mode: mode.as_str(),
        message: e.to_string(),
    })
}

/// Resolves the credential stored in the environment variable `var`.
pub fn credential(var: &str) -> ProviderResult<String> {
    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ProviderError::MissingCredential(var.to_string())),
    }
}

pub fn optional_credential(var: Option<&str>) -> Option<String> {
    var.and_then(|v| credential(v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const RECORDS: &str = r#"[
        {"provider": "alpaca", "realtime": {"symbol": "AAPL"}, "historical": {"symbol": "MSFT"}},
        {"provider": "coinbase_pro", "realtime": {"symbol": "BTC-USD"}}
    ]"#;

    #[derive(Debug, Deserialize)]
    struct Sample {
        symbol: String,
        #[serde(default)]
        use_sandbox: bool,
    }

    #[test]
    fn finds_record_by_provider_name() {
        let r = find_record(RECORDS, "alpaca").unwrap();
        assert_eq!(r.options(DataMode::Historical)["symbol"], "MSFT");
        assert_eq!(r.options(DataMode::Realtime)["symbol"], "AAPL");

        let cb = find_record(RECORDS, "coinbase_pro").unwrap();
        assert!(cb.historical.is_empty());
    }

    #[test]
    fn default_provider_name_has_no_record() {
        let err = find_record(RECORDS, &default_provider_name()).unwrap_err();
        assert!(matches!(err, ProviderError::MissingRecord(ref n) if n == "binance"));
        assert!(err.is_configuration());
    }

    #[test]
    fn loads_records_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(RECORDS.as_bytes()).unwrap();
        let r = load_provider_record(f.path(), "coinbase_pro").unwrap();
        assert_eq!(r.provider, "coinbase_pro");
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = load_provider_record("/nonexistent/config.json", "alpaca").unwrap_err();
        assert!(matches!(err, ProviderError::Config(_)));
    }

    #[test]
    fn option_bag_parses_into_typed_options() {
        let r = find_record(RECORDS, "alpaca").unwrap();
        let o: Sample = parse_options("alpaca", DataMode::Realtime, &r.realtime).unwrap();
        assert_eq!(o.symbol, "AAPL");
        assert!(!o.use_sandbox);
    }

    #[test]
    fn missing_required_option_is_reported() {
        let err = parse_options::<Sample>("alpaca", DataMode::Historical, &Map::new()).unwrap_err();
        match err {
            ProviderError::InvalidOptions { provider, mode, message } => {
                assert_eq!(provider, "alpaca");
                assert_eq!(mode, "historical");
                assert!(message.contains("symbol"), "{message}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unset_credential_is_an_error() {
        let err = credential("MARKET_FEED_TEST_UNSET_CREDENTIAL").unwrap_err();
        assert!(matches!(err, ProviderError::MissingCredential(_)));
        assert_eq!(optional_credential(Some("MARKET_FEED_TEST_UNSET_CREDENTIAL")), None);
        assert_eq!(optional_credential(None), None);
    }

    #[test]
    fn credential_reads_environment() {
        std::env::set_var("MARKET_FEED_TEST_SET_CREDENTIAL", " secret ");
        assert_eq!(credential("MARKET_FEED_TEST_SET_CREDENTIAL").unwrap(), "secret");
    }

    #[test]
    fn historical_range_parses_rfc3339() {
        let s = Settings {
            provider_name: "alpaca".into(),
            config_path: default_config_path(),
            log_dir: default_log_dir(),
            historical_start: Some("2024-05-24T00:00:00Z".into()),
            historical_end: Some("  ".into()),
            check_market_status: false,
        };
        let (start, end) = s.historical_range().unwrap();
        assert_eq!(start.unwrap().to_rfc3339(), "2024-05-24T00:00:00+00:00");
        assert!(end.is_none());
    }

    #[test]
    fn market_status_check_is_opt_in() {
        let s: Settings = config::Config::builder()
            .set_override("provider_name", "alpaca")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(s.provider_name, "alpaca");
        assert_eq!(s.log_dir, "logs");
        assert!(!s.check_market_status);

        let s: Settings = config::Config::builder()
            .set_override("check_market_status", "true")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert!(s.check_market_status);
    }
}
