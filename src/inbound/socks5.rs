//! SOCKS5 inbound: accepts local connections, negotiates CONNECT, and
//! supervises one tunnel per connection.

use super::InboundListener;
use crate::common::net::{configure_tcp_stream, Address};
use crate::common::socks::{
    AuthRequest, AuthResponse, Command, Request, Response, AUTH_NO_ACCEPTABLE, AUTH_NO_AUTH,
    REP_ADDRESS_TYPE_NOT_SUPPORTED, REP_COMMAND_NOT_SUPPORTED, REP_GENERAL_FAILURE,
};
use crate::config::Config;
use crate::outbound::ShadowsocksOutbound;
use crate::tunnel;
use crate::{Error, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info};

/// SOCKS5 listener bound to the local port
pub struct Socks5Listener {
    outbound: Arc<ShadowsocksOutbound>,
    idle_timeout: Duration,
    local_addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    running: AtomicBool,
    shutdown: Notify,
}

impl Socks5Listener {
    /// Bind to `127.0.0.1:local_port`. Bind failures are fatal.
    pub async fn bind(config: &Config, outbound: Arc<ShadowsocksOutbound>) -> Result<Self> {
        let listen = format!("127.0.0.1:{}", config.local_port);
        let listener = TcpListener::bind(&listen)
            .await
            .map_err(|e| Error::config(format!("Bind to {} failed: {}", listen, e)))?;
        let local_addr = listener.local_addr()?;

        Ok(Socks5Listener {
            outbound,
            idle_timeout: config.timeout_duration(),
            local_addr,
            listener: Mutex::new(Some(listener)),
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
        })
    }

    /// The bound address (resolves port 0 to the actual port)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn handle_connection(
        outbound: Arc<ShadowsocksOutbound>,
        mut stream: TcpStream,
        peer_addr: SocketAddr,
        idle_timeout: Duration,
    ) {
        match Self::process_connection(&outbound, &mut stream, peer_addr, idle_timeout).await {
            Ok(()) => {}
            // AEAD failures and dial failures are the loud ones; the rest
            // of the per-tunnel taxonomy stays at debug.
            Err(e @ Error::Crypto(_)) | Err(e @ Error::Connection(_)) => {
                error!("Tunnel from {} failed: {}", peer_addr, e);
            }
            Err(e) => {
                debug!("SOCKS5 connection from {} closed: {}", peer_addr, e);
            }
        }
    }

    async fn process_connection(
        outbound: &ShadowsocksOutbound,
        stream: &mut TcpStream,
        peer_addr: SocketAddr,
        idle_timeout: Duration,
    ) -> Result<()> {
        // Step 1: method negotiation (no-auth only)
        let greeting = AuthRequest::read_from(stream).await?;
        if !greeting.supports(AUTH_NO_AUTH) {
            AuthResponse::new(AUTH_NO_ACCEPTABLE)
                .write_to(stream)
                .await?;
            return Err(Error::socks("No acceptable authentication method"));
        }
        AuthResponse::new(AUTH_NO_AUTH).write_to(stream).await?;

        // Step 2: request
        let request = match Request::read_from(stream).await {
            Ok(r) => r,
            Err(Error::Unsupported(msg)) => {
                Response::failure(REP_ADDRESS_TYPE_NOT_SUPPORTED)
                    .write_to(stream)
                    .await?;
                return Err(Error::socks(msg));
            }
            Err(e @ Error::Address(_)) => {
                let _ = Response::failure(REP_ADDRESS_TYPE_NOT_SUPPORTED)
                    .write_to(stream)
                    .await;
                return Err(e);
            }
            Err(e @ Error::Socks(_)) => {
                let _ = Response::failure(REP_GENERAL_FAILURE).write_to(stream).await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if request.command != Command::Connect {
            Response::failure(REP_COMMAND_NOT_SUPPORTED)
                .write_to(stream)
                .await?;
            return Err(Error::socks(format!(
                "Unsupported command: {:?}",
                request.command
            )));
        }

        // IPv6 targets are refused; the remote-bound record would carry
        // the raw 16-byte form and not every server accepts it.
        if matches!(request.address, Address::Ipv6(_)) {
            Response::failure(REP_ADDRESS_TYPE_NOT_SUPPORTED)
                .write_to(stream)
                .await?;
            return Err(Error::socks("IPv6 target not supported"));
        }

        let target = request.address.to_string_with_port(request.port);
        debug!("SOCKS5 CONNECT {} -> {}", peer_addr, target);

        // Step 3: dial the remote; the target record goes out as the
        // first encrypted payload.
        let shadow = match outbound.connect(&request.address, request.port).await {
            Ok(s) => s,
            Err(e) => {
                let _ = Response::failure(REP_GENERAL_FAILURE).write_to(stream).await;
                return Err(e);
            }
        };

        // Step 4: tell the client and glue the pipes.
        Response::success().write_to(stream).await?;

        let (sent, received) = tunnel::relay(&mut *stream, shadow, idle_timeout).await?;
        debug!(
            "Tunnel {} -> {} closed (sent: {}, received: {})",
            peer_addr, target, sent, received
        );
        Ok(())
    }
}

#[async_trait]
impl InboundListener for Socks5Listener {
    fn name(&self) -> &str {
        "SOCKS5"
    }

    async fn start(&self) -> Result<()> {
        let listener = self
            .listener
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::internal("Listener already started"))?;

        info!("SOCKS5 proxy listening on {}", self.local_addr);
        self.running.store(true, Ordering::SeqCst);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        configure_tcp_stream(&stream);
                        let outbound = self.outbound.clone();
                        let idle_timeout = self.idle_timeout;
                        tokio::spawn(async move {
                            Self::handle_connection(outbound, stream, peer_addr, idle_timeout)
                                .await;
                        });
                    }
                    Err(e) => {
                        error!("SOCKS5 accept error: {}", e);
                    }
                },
                _ = self.shutdown.notified() => break,
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("SOCKS5 proxy stopped");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        // notify_one stores a permit, so a stop that lands between two
        // accept polls is not lost.
        self.shutdown.notify_one();
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
