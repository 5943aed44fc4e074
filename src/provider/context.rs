use std::sync::Arc;

use uuid::Uuid;

use crate::dates::DateNormalizer;
use crate::error::ProviderResult;
use crate::transport::{HttpTransport, ReqwestTransport};
use crate::types::{DataMode, ProviderKind};

/// Logging handle given to each provider at construction.
///
/// Providers log with `parent: &ctx.span` so every line carries the provider
/// name, mode and session id.
#[derive(Debug, Clone)]
pub struct ProviderContext {
    pub span: tracing::Span,
}

impl ProviderContext {
    pub fn new(kind: ProviderKind, mode: DataMode) -> Self {
        let session_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "provider",
            name = kind.as_str(),
            mode = mode.as_str(),
            session = %session_id
        );
        Self { span }
    }
}

/// Collaborators shared by every provider constructor.
#[derive(Clone)]
pub struct ProviderDeps {
    pub transport: Arc<dyn HttpTransport>,
    pub normalizer: DateNormalizer,
}

impl ProviderDeps {
    pub fn live() -> ProviderResult<Self> {
        Ok(Self {
            transport: Arc::new(ReqwestTransport::new()?),
            normalizer: DateNormalizer::new(),
        })
    }

    pub fn with_transport(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            normalizer: DateNormalizer::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::test_support::capture_logs;

    #[test]
    fn span_tags_every_line() {
        let (_guard, logs) = capture_logs();
        let ctx = ProviderContext::new(ProviderKind::CoinbasePro, DataMode::Historical);
        tracing::info!(parent: &ctx.span, "hello");

        let out = logs.contents();
        assert!(out.contains(r#"name="coinbase_pro""#), "{out}");
        assert!(out.contains(r#"mode="historical""#), "{out}");
        assert!(out.contains("session="), "{out}");
    }

    #[test]
    fn each_context_gets_its_own_session() {
        let (_guard, logs) = capture_logs();
        for _ in 0..2 {
            let ctx = ProviderContext::new(ProviderKind::Alpaca, DataMode::Realtime);
            tracing::info!(parent: &ctx.span, "hello");
        }
        let sessions: Vec<String> = logs
            .contents()
            .lines()
            .filter_map(|l| l.split("session=").nth(1))
            .map(|rest| rest.chars().take(36).collect())
            .collect();
        assert_eq!(sessions.len(), 2);
        assert_ne!(sessions[0], sessions[1]);
    }
}
