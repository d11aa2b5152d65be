//! sslocal-rust - Shadowsocks SOCKS5 local client (ss-local)
//!
//! Accepts plaintext SOCKS5 CONNECT requests on a loopback port and
//! tunnels them through a remote Shadowsocks server using the AEAD wire
//! protocol (length-prefixed chunks, per-chunk nonces, HKDF-SHA1 subkeys).
//!
//! # Architecture
//!
//! ```text
//! +-----------+     +-------------------+     +--------------------+
//! | inbound/  | --> |     tunnel/       | --> |     outbound/      |
//! | (SOCKS5)  |     | (relay, timeouts) |     | (Shadowsocks AEAD) |
//! +-----------+     +-------------------+     +---------+----------+
//!                                                       |
//!                                             +---------v----------+
//!                                             |      crypto/       |
//!                                             | (framer, subkeys)  |
//!                                             +--------------------+
//! ```

pub mod common;
pub mod config;
pub mod crypto;
pub mod inbound;
pub mod outbound;
pub mod tunnel;

pub use common::error::{Error, Result};
pub use config::Config;

use inbound::{InboundListener, Socks5Listener};
use outbound::ShadowsocksOutbound;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// sslocal-rust version
pub const VERSION: &str = "0.1.0";

/// Client instance wiring the local SOCKS5 listener to the remote
/// Shadowsocks outbound
pub struct Client {
    listener: Arc<Socks5Listener>,
}

impl Client {
    /// Create a new client from configuration; binds the local port
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let outbound = Arc::new(ShadowsocksOutbound::new(&config)?);
        let listener = Arc::new(Socks5Listener::bind(&config, outbound).await?);
        info!(
            "Relaying {} via {}:{} ({})",
            listener.local_addr(),
            config.server,
            config.server_port,
            config.method
        );

        Ok(Client { listener })
    }

    /// The bound local address
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Run the accept loop until [`Client::shutdown`] is called
    pub async fn run(&self) -> Result<()> {
        self.listener.start().await
    }

    /// Stop accepting connections; established tunnels run to completion
    pub async fn shutdown(&self) -> Result<()> {
        self.listener.stop().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, "0.1.0");
    }
}
