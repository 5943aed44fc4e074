use thiserror::Error;

/// Errors raised while building or driving a provider.
///
/// Configuration variants surface at construction and are meant to abort the run.
/// Transport and vendor variants come out of network calls and are propagated
/// unchanged; nothing in this crate retries them.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("unsupported provider: {0}")]
    UnknownProvider(String),

    #[error("no configuration found for provider: {0}")]
    MissingRecord(String),

    #[error("invalid {mode} options for {provider}: {message}")]
    InvalidOptions {
        provider: String,
        mode: &'static str,
        message: String,
    },

    #[error("environment variable {0} is not set")]
    MissingCredential(String),

    #[error("unsupported granularity: {granularity}, supported values are {supported:?}")]
    UnsupportedGranularity {
        granularity: u32,
        supported: &'static [u32],
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("http {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{provider} api error: {message}")]
    Vendor { provider: String, message: String },

    #[error("not connected")]
    NotConnected,
}

impl ProviderError {
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ProviderError::UnknownProvider(_)
                | ProviderError::MissingRecord(_)
                | ProviderError::InvalidOptions { .. }
                | ProviderError::MissingCredential(_)
                | ProviderError::UnsupportedGranularity { .. }
                | ProviderError::Config(_)
        )
    }

    pub(crate) fn vendor(provider: &str, message: impl Into<String>) -> Self {
        ProviderError::Vendor {
            provider: provider.to_string(),
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Transport(e.to_string())
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
