//! Interactive Brokers Client Portal gateway helpers shared by the streaming
//! and historical providers.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ProviderError, ProviderResult};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

const PROVIDER: &str = "interactive_brokers";

/// Where the gateway lives. Either a full `url` or `host` + `port`.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayAddr {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl GatewayAddr {
    pub fn base_url(&self) -> ProviderResult<String> {
        match (&self.url, &self.host, self.port) {
            (Some(url), _, _) => Ok(url.trim_end_matches('/').to_string()),
            (None, Some(host), Some(port)) => Ok(format!("https://{}:{}/v1/api", host, port)),
            _ => Err(ProviderError::InvalidOptions {
                provider: PROVIDER.to_string(),
                mode: "gateway",
                message: "either `url` or both `host` and `port` are required".to_string(),
            }),
        }
    }
}

pub struct Gateway {
    base_url: String,
    transport: Arc<dyn HttpTransport>,
}

#[derive(Debug, Deserialize)]
struct TickleResp {
    #[serde(default)]
    session: Option<String>,
}

impl Gateway {
    pub fn new(base_url: String, transport: Arc<dyn HttpTransport>) -> Self {
        Self { base_url, transport }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sends one request; non-2xx is an error.
    pub async fn send(&self, req: HttpRequest) -> ProviderResult<HttpResponse> {
        self.transport.send(req).await?.error_for_status()
    }

    /// Session token the WebSocket expects as its first frame.
    pub async fn session_token(&self) -> ProviderResult<String> {
        let resp = self.send(HttpRequest::post(self.endpoint("/tickle"))).await?;
        let t: TickleResp = resp.json()?;
        t.session
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProviderError::vendor(PROVIDER, "gateway returned no session; is the gateway authenticated?"))
    }

    /// Uses `conid` when configured, otherwise looks the symbol up.
    pub async fn contract_id(&self, symbol: &str, conid: Option<i64>) -> ProviderResult<i64> {
        if let Some(c) = conid {
            return Ok(c);
        }
        let resp = self
            .send(HttpRequest::get(self.endpoint("/iserver/secdef/search")).query("symbol", symbol))
            .await?;
        let v: Value = resp.json()?;
        first_conid(&v).ok_or_else(|| ProviderError::vendor(PROVIDER, format!("no contract found for {}", symbol)))
    }
}

fn first_conid(v: &Value) -> Option<i64> {
    let c = v.as_array()?.first()?.get("conid")?;
    c.as_i64().or_else(|| c.as_str()?.parse().ok())
}
