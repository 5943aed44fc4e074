//! Coinbase Exchange request signing.
//!
//! `CB-ACCESS-SIGN` is base64(HMAC-SHA256(base64_decode(secret), prehash)) with
//! prehash = timestamp + METHOD + request_path + body. The request path
//! includes the query string exactly as it goes on the wire.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::optional_credential;
use crate::error::{ProviderError, ProviderResult};

type HmacSha256 = Hmac<Sha256>;

/// Path the WebSocket feed expects authenticated subscriptions to sign.
pub const WS_VERIFY_PATH: &str = "/users/self/verify";

#[derive(Clone)]
pub struct CoinbaseSigner {
    api_key: String,
    secret: Vec<u8>,
    passphrase: String,
}

impl std::fmt::Debug for CoinbaseSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoinbaseSigner")
            .field("api_key_len", &self.api_key.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub key: String,
    pub signature: String,
    pub timestamp: String,
    pub passphrase: String,
}

impl CoinbaseSigner {
    pub fn new(api_key: impl Into<String>, secret_b64: &str, passphrase: impl Into<String>) -> ProviderResult<Self> {
        let secret = BASE64
            .decode(secret_b64.trim())
            .map_err(|e| ProviderError::Config(format!("coinbase secret is not valid base64: {}", e)))?;
        Ok(Self {
            api_key: api_key.into(),
            secret,
            passphrase: passphrase.into(),
        })
    }

    /// Builds a signer when all three variables resolve; `Ok(None)` if any is unset.
    pub fn from_env(
        api_key_env: Option<&str>,
        secret_key_env: Option<&str>,
        passphrase_env: Option<&str>,
    ) -> ProviderResult<Option<Self>> {
        match (
            optional_credential(api_key_env),
            optional_credential(secret_key_env),
            optional_credential(passphrase_env),
        ) {
            (Some(k), Some(s), Some(p)) => Ok(Some(Self::new(k, &s, p)?)),
            _ => Ok(None),
        }
    }

    pub fn sign(&self, timestamp: &str, method: &str, request_path: &str, body: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(timestamp.as_bytes());
        mac.update(method.to_ascii_uppercase().as_bytes());
        mac.update(request_path.as_bytes());
        mac.update(body.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    pub fn headers(&self, timestamp: i64, method: &str, request_path: &str) -> SignedHeaders {
        let timestamp = timestamp.to_string();
        SignedHeaders {
            key: self.api_key.clone(),
            signature: self.sign(&timestamp, method, request_path, ""),
            timestamp,
            passphrase: self.passphrase.clone(),
        }
    }
}
