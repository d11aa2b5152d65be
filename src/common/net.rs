//! Network utilities

use crate::{Error, Result};
use socket2::SockRef;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;

#[inline]
pub fn configure_tcp_stream(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    let sock = SockRef::from(stream);
    let _ = sock.set_keepalive(true);
}

/// SOCKS5 address type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// IPv4 address
    Ipv4(Ipv4Addr),
    /// IPv6 address
    Ipv6(Ipv6Addr),
    /// Domain name
    Domain(String),
}

impl Address {
    /// Parse from SOCKS5 format (ATYP byte, address, 2-byte port)
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(Self, u16)> {
        let mut atyp = [0u8; 1];
        reader.read_exact(&mut atyp).await?;

        match atyp[0] {
            0x01 => {
                let mut buf = [0u8; 6];
                reader.read_exact(&mut buf).await?;
                let addr = Address::Ipv4(Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]));
                let port = u16::from_be_bytes([buf[4], buf[5]]);
                Ok((addr, port))
            }
            0x03 => {
                let mut len = [0u8; 1];
                reader.read_exact(&mut len).await?;
                let len = len[0] as usize;
                if len == 0 {
                    return Err(Error::address("Empty domain name"));
                }
                let mut buf = vec![0u8; len + 2];
                reader.read_exact(&mut buf).await?;
                let domain = String::from_utf8(buf[..len].to_vec())
                    .map_err(|e| Error::address(format!("Invalid domain: {}", e)))?;
                let port = u16::from_be_bytes([buf[len], buf[len + 1]]);
                Ok((Address::Domain(domain), port))
            }
            0x04 => {
                let mut buf = [0u8; 18];
                reader.read_exact(&mut buf).await?;
                let mut ip = [0u8; 16];
                ip.copy_from_slice(&buf[..16]);
                let addr = Address::Ipv6(Ipv6Addr::from(ip));
                let port = u16::from_be_bytes([buf[16], buf[17]]);
                Ok((addr, port))
            }
            t => Err(Error::unsupported(format!("Address type: {}", t))),
        }
    }

    /// Encode in SOCKS5 format: `[ATYP | ADDR | PORT]`.
    ///
    /// This is the exact wire form forwarded to the Shadowsocks server as
    /// the first payload of a tunnel.
    pub fn to_socks5_bytes(&self, port: u16) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.len());
        match self {
            Address::Ipv4(ip) => {
                buf.push(0x01);
                buf.extend_from_slice(&ip.octets());
            }
            Address::Ipv6(ip) => {
                buf.push(0x04);
                buf.extend_from_slice(&ip.octets());
            }
            Address::Domain(domain) => {
                let bytes = domain.as_bytes();
                buf.push(0x03);
                buf.push(bytes.len() as u8);
                buf.extend_from_slice(bytes);
            }
        }
        buf.extend_from_slice(&port.to_be_bytes());
        buf
    }

    /// Get bytes length
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        match self {
            Address::Ipv4(_) => 1 + 4 + 2,             // atyp + ip + port
            Address::Ipv6(_) => 1 + 16 + 2,            // atyp + ip + port
            Address::Domain(d) => 1 + 1 + d.len() + 2, // atyp + len + domain + port
        }
    }

    /// Convert to string representation
    pub fn to_string_with_port(&self, port: u16) -> String {
        match self {
            Address::Ipv4(ip) => format!("{}:{}", ip, port),
            Address::Ipv6(ip) => format!("[{}]:{}", ip, port),
            Address::Domain(d) => format!("{}:{}", d, port),
        }
    }
}

impl From<Ipv4Addr> for Address {
    fn from(ip: Ipv4Addr) -> Self {
        Address::Ipv4(ip)
    }
}

impl From<Ipv6Addr> for Address {
    fn from(ip: Ipv6Addr) -> Self {
        Address::Ipv6(ip)
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Address::Ipv4(v4),
            IpAddr::V6(v6) => Address::Ipv6(v6),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_len() {
        let ipv4 = Address::Ipv4(Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(ipv4.len(), 7);

        let domain = Address::Domain("example.com".to_string());
        assert_eq!(domain.len(), 1 + 1 + 11 + 2);
    }

    #[test]
    fn test_encode_ipv4() {
        let addr = Address::Ipv4(Ipv4Addr::new(127, 0, 0, 1));
        let bytes = addr.to_socks5_bytes(8080);
        assert_eq!(bytes, [0x01, 127, 0, 0, 1, 0x1F, 0x90]);
    }

    #[test]
    fn test_encode_domain() {
        let addr = Address::Domain("example.com".to_string());
        let bytes = addr.to_socks5_bytes(80);
        assert_eq!(bytes, b"\x03\x0bexample.com\x00\x50");
    }

    #[tokio::test]
    async fn test_read_round_trips_encode() {
        let addr = Address::Domain("example.com".to_string());
        let bytes = addr.to_socks5_bytes(443);
        let mut reader = bytes.as_slice();
        let (parsed, port) = Address::read_from(&mut reader).await.unwrap();
        assert_eq!(parsed, addr);
        assert_eq!(port, 443);
    }

    #[tokio::test]
    async fn test_read_rejects_empty_domain() {
        let bytes = [0x03u8, 0x00, 0x00, 0x50];
        let mut reader = bytes.as_slice();
        assert!(Address::read_from(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn test_read_rejects_unknown_atyp() {
        let bytes = [0x05u8, 0, 0, 0, 0, 0, 0];
        let mut reader = bytes.as_slice();
        let err = Address::read_from(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }
}
