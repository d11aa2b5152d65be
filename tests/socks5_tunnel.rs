//! End-to-end tests: SOCKS5 client -> local listener -> mock Shadowsocks
//! server, exercising the full handshake, relay, and failure paths.

use sslocal_rust::config::Config;
use sslocal_rust::crypto::{CipherKind, Decryptor, Encryptor};
use sslocal_rust::Client;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

const PASSWORD: &str = "test-password";
const METHOD: &str = "chacha20-ietf-poly1305";

async fn start_client(server_port: u16, timeout_secs: u64) -> Arc<Client> {
    let config = Config {
        server: "127.0.0.1".to_string(),
        server_port,
        password: PASSWORD.to_string(),
        method: METHOD.to_string(),
        local_port: 0,
        timeout: timeout_secs,
        log_level: None,
    };
    let client = Arc::new(Client::new(config).await.unwrap());
    let runner = client.clone();
    tokio::spawn(async move { runner.run().await });
    client
}

/// Mock Shadowsocks server: accepts one connection, decrypts the request
/// stream, reports the target address record over the channel, and echoes
/// every following payload back encrypted.
async fn spawn_mock_remote() -> (SocketAddr, mpsc::Receiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel(1);

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let kind = CipherKind::try_from(METHOD).unwrap();
        let mut decryptor = Decryptor::new(kind, PASSWORD.as_bytes());
        let mut encryptor = Encryptor::new(kind, PASSWORD.as_bytes());

        let mut plain: Vec<u8> = Vec::new();
        let mut record_len = 0usize;
        let mut record_sent = false;
        let mut buf = [0u8; 4096];

        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            plain.extend_from_slice(&decryptor.push(&buf[..n]).unwrap());

            if !record_sent {
                if record_len == 0 && !plain.is_empty() {
                    record_len = match plain[0] {
                        0x01 => 1 + 4 + 2,
                        0x03 if plain.len() >= 2 => 1 + 1 + plain[1] as usize + 2,
                        0x03 => continue,
                        0x04 => 1 + 16 + 2,
                        _ => break,
                    };
                }
                if record_len > 0 && plain.len() >= record_len {
                    let record: Vec<u8> = plain.drain(..record_len).collect();
                    let _ = tx.send(record).await;
                    record_sent = true;
                }
            }

            if record_sent && !plain.is_empty() {
                let payload: Vec<u8> = plain.drain(..).collect();
                let wire = encryptor.push(&payload).unwrap();
                if stream.write_all(&wire).await.is_err() {
                    break;
                }
            }
        }
    });

    (addr, rx)
}

async fn socks5_handshake(sock: &mut TcpStream) {
    sock.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut method = [0u8; 2];
    sock.read_exact(&mut method).await.unwrap();
    assert_eq!(method, [0x05, 0x00]);
}

#[tokio::test]
async fn test_domain_connect_forwards_record_and_relays() {
    let (remote_addr, mut rx) = spawn_mock_remote().await;
    let client = start_client(remote_addr.port(), 60).await;

    let mut sock = TcpStream::connect(client.local_addr()).await.unwrap();
    socks5_handshake(&mut sock).await;

    sock.write_all(b"\x05\x01\x00\x03\x0bexample.com\x00\x50")
        .await
        .unwrap();
    let mut reply = [0u8; 10];
    sock.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[0], 0x05);
    assert_eq!(reply[1], 0x00);

    // The first plaintext on the encrypted channel is the exact
    // [ATYP | ADDR | PORT] slice from the SOCKS5 request.
    let record = timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record, b"\x03\x0bexample.com\x00\x50");

    // Payload goes out encrypted and comes back decrypted.
    sock.write_all(b"hello through the tunnel").await.unwrap();
    let mut echo = [0u8; 24];
    timeout(Duration::from_secs(5), sock.read_exact(&mut echo))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&echo, b"hello through the tunnel");

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_ipv4_connect_forwards_record() {
    let (remote_addr, mut rx) = spawn_mock_remote().await;
    let client = start_client(remote_addr.port(), 60).await;

    let mut sock = TcpStream::connect(client.local_addr()).await.unwrap();
    socks5_handshake(&mut sock).await;

    sock.write_all(&[0x05, 0x01, 0x00, 0x01, 10, 0, 0, 1, 0x01, 0xBB])
        .await
        .unwrap();
    let mut reply = [0u8; 10];
    sock.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x00);

    let record = timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record, [0x01, 10, 0, 0, 1, 0x01, 0xBB]);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_bind_command_rejected() {
    let (remote_addr, _rx) = spawn_mock_remote().await;
    let client = start_client(remote_addr.port(), 60).await;

    let mut sock = TcpStream::connect(client.local_addr()).await.unwrap();
    socks5_handshake(&mut sock).await;

    // BIND request
    sock.write_all(&[0x05, 0x02, 0x00, 0x01, 127, 0, 0, 1, 0x00, 0x50])
        .await
        .unwrap();
    let mut reply = [0u8; 10];
    sock.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x07);

    // Connection is closed after the reply.
    let mut probe = [0u8; 1];
    let res = timeout(Duration::from_secs(5), sock.read(&mut probe))
        .await
        .unwrap();
    assert!(matches!(res, Ok(0) | Err(_)));

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_ipv6_target_rejected() {
    let (remote_addr, _rx) = spawn_mock_remote().await;
    let client = start_client(remote_addr.port(), 60).await;

    let mut sock = TcpStream::connect(client.local_addr()).await.unwrap();
    socks5_handshake(&mut sock).await;

    let mut request = vec![0x05, 0x01, 0x00, 0x04];
    request.extend_from_slice(&[0u8; 15]);
    request.push(1); // ::1
    request.extend_from_slice(&[0x00, 0x50]);
    sock.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    sock.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x08);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_empty_domain_rejected() {
    let (remote_addr, _rx) = spawn_mock_remote().await;
    let client = start_client(remote_addr.port(), 60).await;

    let mut sock = TcpStream::connect(client.local_addr()).await.unwrap();
    socks5_handshake(&mut sock).await;

    // Domain request with a zero-length name.
    sock.write_all(&[0x05, 0x01, 0x00, 0x03, 0x00, 0x00, 0x50])
        .await
        .unwrap();
    let mut reply = [0u8; 10];
    sock.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x08);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_request_version_rejected() {
    let (remote_addr, _rx) = spawn_mock_remote().await;
    let client = start_client(remote_addr.port(), 60).await;

    let mut sock = TcpStream::connect(client.local_addr()).await.unwrap();
    socks5_handshake(&mut sock).await;

    // Request with the wrong version byte.
    sock.write_all(&[0x04, 0x01, 0x00, 0x01, 127, 0, 0, 1, 0x00, 0x50])
        .await
        .unwrap();
    let mut reply = [0u8; 10];
    sock.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x01);

    // Connection is closed after the reply.
    let mut probe = [0u8; 1];
    let res = timeout(Duration::from_secs(5), sock.read(&mut probe))
        .await
        .unwrap();
    assert!(matches!(res, Ok(0) | Err(_)));

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_no_acceptable_auth_method() {
    let (remote_addr, _rx) = spawn_mock_remote().await;
    let client = start_client(remote_addr.port(), 60).await;

    let mut sock = TcpStream::connect(client.local_addr()).await.unwrap();
    // Offer only username/password.
    sock.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
    let mut method = [0u8; 2];
    sock.read_exact(&mut method).await.unwrap();
    assert_eq!(method, [0x05, 0xFF]);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_remote_dial_failure_replies_general_failure() {
    // Grab a free port and release it so nothing is listening there.
    let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = unused.local_addr().unwrap().port();
    drop(unused);

    let client = start_client(dead_port, 60).await;

    let mut sock = TcpStream::connect(client.local_addr()).await.unwrap();
    socks5_handshake(&mut sock).await;

    sock.write_all(b"\x05\x01\x00\x03\x0bexample.com\x00\x50")
        .await
        .unwrap();
    let mut reply = [0u8; 10];
    sock.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x01);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_idle_timeout_closes_tunnel() {
    let (remote_addr, mut rx) = spawn_mock_remote().await;
    let client = start_client(remote_addr.port(), 1).await;

    let mut sock = TcpStream::connect(client.local_addr()).await.unwrap();
    socks5_handshake(&mut sock).await;

    sock.write_all(b"\x05\x01\x00\x03\x0bexample.com\x00\x50")
        .await
        .unwrap();
    let mut reply = [0u8; 10];
    sock.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x00);

    let _ = timeout(Duration::from_secs(5), rx.recv()).await;

    // Send nothing: the tunnel must be torn down by the idle deadline.
    let mut probe = [0u8; 1];
    let res = timeout(Duration::from_secs(5), sock.read(&mut probe))
        .await
        .expect("tunnel was not closed by the idle timeout");
    assert!(matches!(res, Ok(0) | Err(_)));

    client.shutdown().await.unwrap();
}
