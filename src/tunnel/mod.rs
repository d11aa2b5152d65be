//! Per-tunnel relay: duplex copy with half-close and an idle deadline

use crate::{Error, Result};
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Relay bytes between the SOCKS5 client and the encrypted remote stream
/// until both directions have closed, either side fails, or no bytes move
/// in either direction for `idle_timeout`.
///
/// EOF on one direction flushes and shuts down only that write side, so
/// protocols that half-close (request body done, response still
/// streaming) keep working. Any error tears down both directions: the
/// halves run under `try_join` and the whole future is dropped on the
/// first failure, which closes both sockets and releases cipher state.
///
/// Returns `(client_to_remote, remote_to_client)` byte counts.
pub async fn relay<A, B>(client: A, remote: B, idle_timeout: Duration) -> Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (remote_read, remote_write) = tokio::io::split(remote);

    let start = Instant::now();
    let activity = Arc::new(AtomicU64::new(0));

    let upload = copy_half(client_read, remote_write, start, activity.clone());
    let download = copy_half(remote_read, client_write, start, activity.clone());

    tokio::select! {
        res = async { tokio::try_join!(upload, download) } => res,
        _ = idle_watchdog(start, activity, idle_timeout) => {
            Err(Error::timeout(format!(
                "No activity for {}s",
                idle_timeout.as_secs()
            )))
        }
    }
}

/// Copy one direction until EOF, then shut down the write side.
async fn copy_half<R, W>(
    mut src: R,
    mut dst: W,
    start: Instant,
    activity: Arc<AtomicU64>,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; 16 * 1024];
    let mut total = 0u64;

    loop {
        let n = src.read(&mut buf).await.map_err(map_stream_error)?;
        if n == 0 {
            dst.shutdown().await.map_err(map_stream_error)?;
            return Ok(total);
        }
        dst.write_all(&buf[..n]).await.map_err(map_stream_error)?;
        total += n as u64;
        activity.store(start.elapsed().as_millis() as u64, Ordering::Relaxed);
    }
}

/// Completes once `idle_timeout` passes with no recorded activity.
async fn idle_watchdog(start: Instant, activity: Arc<AtomicU64>, idle_timeout: Duration) {
    loop {
        let last = Duration::from_millis(activity.load(Ordering::Relaxed));
        let deadline = last + idle_timeout;
        let elapsed = start.elapsed();
        if elapsed >= deadline {
            return;
        }
        tokio::time::sleep(deadline - elapsed).await;
    }
}

/// Decrypt failures surface from the stream layer as `InvalidData`;
/// restore the crypto taxonomy so callers log them at the right level.
fn map_stream_error(e: std::io::Error) -> Error {
    if e.kind() == ErrorKind::InvalidData {
        Error::crypto(e.to_string())
    } else {
        Error::Io(e)
    }
}
