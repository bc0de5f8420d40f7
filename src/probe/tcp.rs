//! TCP dial phase.

use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;

use super::{CheckFailure, Target};

/// Connect to the first reachable address, trying them in order.
///
/// The budget bounds the whole phase, not each attempt.
pub(super) async fn dial(
    target: &Target,
    addrs: &[SocketAddr],
    budget: Duration,
) -> Result<(TcpStream, SocketAddr, Duration), CheckFailure> {
    let url = target.raw.clone();
    let start = Instant::now();

    match tokio::time::timeout(budget, connect_any(addrs)).await {
        Err(_) => Err(CheckFailure::DialTimeout { url, budget }),
        Ok(Ok((stream, addr))) => Ok((stream, addr, start.elapsed())),
        Ok(Err((addr, e))) if e.kind() == io::ErrorKind::TimedOut => {
            tracing::debug!("Dial to {} timed out at the OS level: {}", addr, e);
            Err(CheckFailure::DialTimeout { url, budget })
        }
        Ok(Err((addr, e))) => Err(CheckFailure::Network {
            url,
            op: "dial",
            detail: format!("{}: {}", addr, e),
        }),
    }
}

async fn connect_any(
    addrs: &[SocketAddr],
) -> Result<(TcpStream, SocketAddr), (SocketAddr, io::Error)> {
    let mut last_err = None;

    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok((stream, *addr)),
            Err(e) => {
                tracing::debug!("Dial to {} failed: {}", addr, e);
                last_err = Some((*addr, e));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        (
            SocketAddr::from(([0, 0, 0, 0], 0)),
            io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses to dial"),
        )
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_dial_falls_through_to_reachable_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap();

        let closed_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed = closed_listener.local_addr().unwrap();
        drop(closed_listener);

        let target = Target::parse(&format!("http://{}", open)).unwrap();
        let (_stream, addr, _) = dial(&target, &[closed, open], Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(addr, open);
    }

    #[tokio::test]
    async fn test_dial_with_no_addresses() {
        let target = Target::parse("http://127.0.0.1:1").unwrap();
        let err = dial(&target, &[], Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, CheckFailure::Network { op: "dial", .. }));
    }
}
