pub mod alpaca;
pub mod alpha_vantage;
pub mod coinbase;
pub mod interactive_brokers;
pub mod socket;

use async_trait::async_trait;

use crate::error::ProviderResult;
use crate::types::{CloseInfo, ProviderKind};

pub use alpaca::AlpacaRealtime;
pub use alpha_vantage::AlphaVantageRealtime;
pub use coinbase::CoinbaseRealtime;
pub use interactive_brokers::IbRealtime;

/// Streaming market-data source.
///
/// `connect` holds the session for its whole lifetime and returns once the
/// venue closes it. Handshake failures propagate; anything that goes wrong
/// inside `on_message` is logged and swallowed.
#[async_trait]
pub trait RealTimeProvider: Send {
    fn kind(&self) -> ProviderKind;

    async fn connect(&mut self) -> ProviderResult<()>;

    async fn subscribe(&mut self, symbol: &str) -> ProviderResult<()>;

    /// Runs once the socket is up; sends auth or subscription frames.
    async fn on_open(&mut self) -> ProviderResult<()>;

    async fn on_message(&mut self, raw: &str);

    async fn on_error(&mut self, error: &str);

    async fn on_close(&mut self, close: Option<CloseInfo>);

    async fn disconnect(&mut self) -> ProviderResult<()>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        pub fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Routes this thread's events into a buffer until the guard drops.
    pub fn capture_logs() -> (tracing::subscriber::DefaultGuard, CapturedLogs) {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        (tracing::subscriber::set_default(subscriber), logs)
    }
}
