//! SOCKS5 protocol implementation (RFC 1928 subset: no-auth, CONNECT)

use super::net::Address;
use crate::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// SOCKS5 version
pub const SOCKS5_VERSION: u8 = 0x05;

// SOCKS5 authentication methods
pub const AUTH_NO_AUTH: u8 = 0x00;
pub const AUTH_NO_ACCEPTABLE: u8 = 0xFF;

// SOCKS5 commands
pub const CMD_CONNECT: u8 = 0x01;
pub const CMD_BIND: u8 = 0x02;
pub const CMD_UDP_ASSOCIATE: u8 = 0x03;

// SOCKS5 address types
pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

// SOCKS5 reply codes
pub const REP_SUCCEEDED: u8 = 0x00;
pub const REP_GENERAL_FAILURE: u8 = 0x01;
pub const REP_CONNECTION_NOT_ALLOWED: u8 = 0x02;
pub const REP_NETWORK_UNREACHABLE: u8 = 0x03;
pub const REP_HOST_UNREACHABLE: u8 = 0x04;
pub const REP_CONNECTION_REFUSED: u8 = 0x05;
pub const REP_TTL_EXPIRED: u8 = 0x06;
pub const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REP_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// SOCKS5 command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Bind,
    UdpAssociate,
}

impl TryFrom<u8> for Command {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            CMD_CONNECT => Ok(Command::Connect),
            CMD_BIND => Ok(Command::Bind),
            CMD_UDP_ASSOCIATE => Ok(Command::UdpAssociate),
            _ => Err(Error::socks(format!("Unknown command: {}", value))),
        }
    }
}

impl From<Command> for u8 {
    fn from(cmd: Command) -> u8 {
        match cmd {
            Command::Connect => CMD_CONNECT,
            Command::Bind => CMD_BIND,
            Command::UdpAssociate => CMD_UDP_ASSOCIATE,
        }
    }
}

/// SOCKS5 authentication request (client greeting)
#[derive(Debug)]
pub struct AuthRequest {
    pub methods: Vec<u8>,
}

impl AuthRequest {
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let mut head = [0u8; 2];
        reader.read_exact(&mut head).await?;

        if head[0] != SOCKS5_VERSION {
            return Err(Error::socks(format!(
                "Unsupported SOCKS version: {}",
                head[0]
            )));
        }

        let mut methods = vec![0u8; head[1] as usize];
        reader.read_exact(&mut methods).await?;

        Ok(AuthRequest { methods })
    }

    pub fn supports(&self, method: u8) -> bool {
        self.methods.contains(&method)
    }
}

/// SOCKS5 authentication response (method selection)
pub struct AuthResponse {
    pub method: u8,
}

impl AuthResponse {
    pub fn new(method: u8) -> Self {
        AuthResponse { method }
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&[SOCKS5_VERSION, self.method]).await?;
        Ok(())
    }
}

/// SOCKS5 request
#[derive(Debug)]
pub struct Request {
    pub command: Command,
    pub address: Address,
    pub port: u16,
}

impl Request {
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let mut header = [0u8; 3];
        reader.read_exact(&mut header).await?;

        if header[0] != SOCKS5_VERSION {
            return Err(Error::socks(format!(
                "Unsupported SOCKS version: {}",
                header[0]
            )));
        }

        let command = Command::try_from(header[1])?;

        // Reserved byte (header[2]) is ignored
        let (address, port) = Address::read_from(reader).await?;

        Ok(Request {
            command,
            address,
            port,
        })
    }

    /// The target address record: the exact `[ATYP | ADDR | PORT]` wire
    /// slice sent to the Shadowsocks server as the first payload.
    pub fn target_record(&self) -> Vec<u8> {
        self.address.to_socks5_bytes(self.port)
    }
}

/// SOCKS5 response
pub struct Response {
    pub reply: u8,
    pub address: Address,
    pub port: u16,
}

impl Response {
    pub fn success() -> Self {
        Response {
            reply: REP_SUCCEEDED,
            address: Address::Ipv4(std::net::Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }

    pub fn failure(reply: u8) -> Self {
        Response {
            reply,
            address: Address::Ipv4(std::net::Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        match &self.address {
            Address::Ipv4(ip) => {
                let mut buf = [0u8; 10];
                buf[0] = SOCKS5_VERSION;
                buf[1] = self.reply;
                buf[2] = 0x00;
                buf[3] = ATYP_IPV4;
                buf[4..8].copy_from_slice(&ip.octets());
                buf[8..10].copy_from_slice(&self.port.to_be_bytes());
                writer.write_all(&buf).await?;
            }
            Address::Ipv6(ip) => {
                let mut buf = [0u8; 22];
                buf[0] = SOCKS5_VERSION;
                buf[1] = self.reply;
                buf[2] = 0x00;
                buf[3] = ATYP_IPV6;
                buf[4..20].copy_from_slice(&ip.octets());
                buf[20..22].copy_from_slice(&self.port.to_be_bytes());
                writer.write_all(&buf).await?;
            }
            Address::Domain(_) => {
                return Err(Error::internal("Bound address is never a domain"));
            }
        }
        Ok(())
    }
}
