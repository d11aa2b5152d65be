//! Inbound adapters (listeners)

mod socks5;

pub use socks5::Socks5Listener;

use crate::Result;
use async_trait::async_trait;

/// Trait for inbound listeners
#[async_trait]
pub trait InboundListener: Send + Sync {
    /// Get listener name
    fn name(&self) -> &str;

    /// Run the accept loop until stopped
    async fn start(&self) -> Result<()>;

    /// Stop accepting new connections; established tunnels keep running
    async fn stop(&self) -> Result<()>;

    /// Check if listener is running
    fn is_running(&self) -> bool;
}
