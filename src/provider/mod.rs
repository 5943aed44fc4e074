//! Binds a configured provider name to a concrete implementation.
//!
//! The name is resolved against [`ProviderKind`] before anything is built, so an
//! unknown name never reaches a constructor.

pub mod context;

pub use context::{ProviderContext, ProviderDeps};

use crate::config::ProviderRecord;
use crate::error::ProviderResult;
use crate::historical::{
    AlpacaHistorical, AlphaVantageHistorical, CoinbaseHistorical, HistoricalProvider, IbHistorical,
};
use crate::realtime::{AlpacaRealtime, AlphaVantageRealtime, CoinbaseRealtime, IbRealtime, RealTimeProvider};
use crate::types::{DataMode, ProviderKind};

pub fn build_realtime(record: &ProviderRecord, deps: &ProviderDeps) -> ProviderResult<Box<dyn RealTimeProvider>> {
    let kind: ProviderKind = record.provider.parse()?;
    let bag = record.options(DataMode::Realtime);
    let ctx = ProviderContext::new(kind, DataMode::Realtime);
    tracing::debug!(parent: &ctx.span, "binding realtime provider");

    Ok(match kind {
        ProviderKind::Alpaca => Box::new(AlpacaRealtime::from_options(bag, ctx)?),
        ProviderKind::AlphaVantage => Box::new(AlphaVantageRealtime::from_options(bag, ctx, deps.transport.clone())?),
        ProviderKind::InteractiveBrokers => Box::new(IbRealtime::from_options(bag, ctx, deps.transport.clone())?),
        ProviderKind::CoinbasePro => Box::new(CoinbaseRealtime::from_options(bag, ctx)?),
    })
}

pub fn build_historical(record: &ProviderRecord, deps: &ProviderDeps) -> ProviderResult<Box<dyn HistoricalProvider>> {
    let kind: ProviderKind = record.provider.parse()?;
    let bag = record.options(DataMode::Historical);
    let ctx = ProviderContext::new(kind, DataMode::Historical);
    let transport = deps.transport.clone();
    let normalizer = deps.normalizer;
    tracing::debug!(parent: &ctx.span, "binding historical provider");

    Ok(match kind {
        ProviderKind::Alpaca => Box::new(AlpacaHistorical::from_options(bag, ctx, transport, normalizer)?),
        ProviderKind::AlphaVantage => Box::new(AlphaVantageHistorical::from_options(bag, ctx, transport, normalizer)?),
        ProviderKind::InteractiveBrokers => Box::new(IbHistorical::from_options(bag, ctx, transport, normalizer)?),
        ProviderKind::CoinbasePro => Box::new(CoinbaseHistorical::from_options(bag, ctx, transport, normalizer)?),
    })
}

/// The one provider instance a run works with.
pub enum BoundProvider {
    Realtime(Box<dyn RealTimeProvider>),
    Historical(Box<dyn HistoricalProvider>),
}

pub fn bind(mode: DataMode, record: &ProviderRecord, deps: &ProviderDeps) -> ProviderResult<BoundProvider> {
    Ok(match mode {
        DataMode::Realtime => BoundProvider::Realtime(build_realtime(record, deps)?),
        DataMode::Historical => BoundProvider::Historical(build_historical(record, deps)?),
    })
}
