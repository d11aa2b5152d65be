//! Shadowsocks outbound protocol

use crate::common::net::{configure_tcp_stream, Address};
use crate::config::Config;
use crate::crypto::{derive_key, CipherKind, Decryptor, Encryptor};
use crate::{Error, Result};
use std::io::{self, ErrorKind};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tracing::debug;
use zeroize::Zeroize;

/// Shadowsocks outbound: dials the remote server and produces encrypted
/// streams. The master key is derived once and shared across tunnels;
/// each tunnel gets its own salts and subkeys.
pub struct ShadowsocksOutbound {
    server: String,
    port: u16,
    cipher: CipherKind,
    key: Vec<u8>,
    connect_timeout: Duration,
}

impl ShadowsocksOutbound {
    pub fn new(config: &Config) -> Result<Self> {
        let cipher = CipherKind::try_from(config.method.as_str())?;
        let key = derive_key(config.password.as_bytes(), cipher.key_size());

        Ok(ShadowsocksOutbound {
            server: config.server.clone(),
            port: config.server_port,
            cipher,
            key,
            connect_timeout: config.timeout_duration(),
        })
    }

    fn server_addr(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }

    /// Connect to the Shadowsocks server and send the target address
    /// record as the first encrypted payload. The salt and the sealed
    /// record hit the wire before any client payload.
    pub async fn connect(&self, target: &Address, target_port: u16) -> Result<ShadowsocksStream> {
        let server_addr = self.server_addr();
        debug!(
            "Shadowsocks connecting to {} via {}",
            target.to_string_with_port(target_port),
            server_addr
        );

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&server_addr))
            .await
            .map_err(|_| Error::connection(format!("Connect to {} timed out", server_addr)))?
            .map_err(|e| Error::connection(format!("Connect to {} failed: {}", server_addr, e)))?;
        configure_tcp_stream(&stream);

        let mut conn = ShadowsocksStream::new(stream, self.cipher, self.key.clone());
        conn.send_target(&target.to_socks5_bytes(target_port))
            .await?;

        debug!(
            "Shadowsocks connected to {}",
            target.to_string_with_port(target_port)
        );
        Ok(conn)
    }
}

impl Drop for ShadowsocksOutbound {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

enum WriteState {
    /// Ready to accept new plaintext
    Ready,
    /// Encrypted bytes pending on the socket; `consumed` is the
    /// plaintext length to report once they are fully written
    Writing {
        data: Vec<u8>,
        written: usize,
        consumed: usize,
    },
}

/// Encrypted connection to the Shadowsocks server.
///
/// The write side runs plaintext through the [`Encryptor`]; the read side
/// feeds raw socket bytes to the [`Decryptor`] and hands back plaintext.
/// Either engine failing surfaces as an `InvalidData` I/O error, which
/// tears the tunnel down.
pub struct ShadowsocksStream {
    inner: TcpStream,
    encryptor: Encryptor,
    decryptor: Decryptor,
    plain: Vec<u8>,
    plain_pos: usize,
    write_state: WriteState,
}

impl ShadowsocksStream {
    pub fn new(inner: TcpStream, cipher: CipherKind, master_key: Vec<u8>) -> Self {
        ShadowsocksStream {
            inner,
            encryptor: Encryptor::with_key(cipher, master_key.clone()),
            decryptor: Decryptor::with_key(cipher, master_key),
            plain: Vec::new(),
            plain_pos: 0,
            write_state: WriteState::Ready,
        }
    }

    async fn send_target(&mut self, record: &[u8]) -> Result<()> {
        let wire = self.encryptor.push(record)?;
        self.inner.write_all(&wire).await?;
        Ok(())
    }
}

impl AsyncRead for ShadowsocksStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            // Hand out buffered plaintext first.
            if this.plain_pos < this.plain.len() {
                let remaining = &this.plain[this.plain_pos..];
                let to_copy = remaining.len().min(buf.remaining());
                buf.put_slice(&remaining[..to_copy]);
                this.plain_pos += to_copy;
                if this.plain_pos >= this.plain.len() {
                    this.plain.clear();
                    this.plain_pos = 0;
                }
                return Poll::Ready(Ok(()));
            }

            let mut raw = [0u8; 4096];
            let mut read_buf = ReadBuf::new(&mut raw);
            match Pin::new(&mut this.inner).poll_read(cx, &mut read_buf) {
                Poll::Ready(Ok(())) => {
                    let filled = read_buf.filled();
                    if filled.is_empty() {
                        if this.decryptor.is_idle() {
                            // Clean EOF on a chunk boundary.
                            return Poll::Ready(Ok(()));
                        }
                        return Poll::Ready(Err(io::Error::new(
                            ErrorKind::UnexpectedEof,
                            "Connection closed mid-chunk",
                        )));
                    }
                    let plain = this
                        .decryptor
                        .push(filled)
                        .map_err(|e| io::Error::new(ErrorKind::InvalidData, e.to_string()))?;
                    this.plain = plain;
                    this.plain_pos = 0;
                    // Loop: either hand out plaintext or read more.
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl AsyncWrite for ShadowsocksStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        loop {
            match &mut this.write_state {
                WriteState::Ready => {
                    if buf.is_empty() {
                        return Poll::Ready(Ok(0));
                    }
                    let data = this
                        .encryptor
                        .push(buf)
                        .map_err(|e| io::Error::new(ErrorKind::InvalidData, e.to_string()))?;
                    this.write_state = WriteState::Writing {
                        data,
                        written: 0,
                        consumed: buf.len(),
                    };
                }
                WriteState::Writing {
                    data,
                    written,
                    consumed,
                } => {
                    while *written < data.len() {
                        match Pin::new(&mut this.inner).poll_write(cx, &data[*written..]) {
                            Poll::Ready(Ok(0)) => {
                                return Poll::Ready(Err(io::Error::new(
                                    ErrorKind::WriteZero,
                                    "Write zero",
                                )));
                            }
                            Poll::Ready(Ok(n)) => *written += n,
                            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                            Poll::Pending => return Poll::Pending,
                        }
                    }
                    let consumed = *consumed;
                    this.write_state = WriteState::Ready;
                    return Poll::Ready(Ok(consumed));
                }
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
