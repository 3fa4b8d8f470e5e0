//! TCP transport for controller links.
//!
//! The harness listens and the controller dials in. Only plain TCP is
//! supported; pairing and discovery hand over an address and nothing more.

use crate::error::LinkError;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::debug;

/// OS socket options applied to the listener and the accepted stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SocketHints {
    /// Disable Nagle on the accepted stream
    pub nodelay: bool,
    /// Enable SO_KEEPALIVE on the listening socket
    pub keepalive: bool,
}

impl Default for SocketHints {
    fn default() -> Self {
        Self {
            nodelay: true,
            keepalive: true,
        }
    }
}

/// Create a TCP listener bound to the given address.
///
/// The backlog is one: a link serves a single controller.
pub fn listen_tcp(addr: SocketAddr, hints: SocketHints) -> Result<TcpListener, LinkError> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    if hints.keepalive {
        socket.set_keepalive(true)?;
    }
    socket.bind(addr)?;
    Ok(socket.listen(1)?)
}

/// Wait up to `wait` for one peer and apply the stream hints
pub async fn accept_one(
    listener: &TcpListener,
    wait: Duration,
    hints: SocketHints,
) -> Result<(TcpStream, SocketAddr), LinkError> {
    let (stream, peer) = tokio::time::timeout(wait, listener.accept())
        .await
        .map_err(|_| LinkError::AcceptTimeout(wait))??;
    if hints.nodelay {
        stream.set_nodelay(true)?;
    }
    debug!("Accepted controller connection from {}", peer);
    Ok((stream, peer))
}

/// Connect to a TCP address
pub async fn connect_tcp(addr: SocketAddr) -> Result<TcpStream, LinkError> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn loopback() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    #[tokio::test]
    async fn test_accept_one_peer() {
        let listener = listen_tcp(loopback(), SocketHints::default()).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        let dialer = tokio::spawn(async move { connect_tcp(addr).await });
        let (stream, peer) = accept_one(&listener, Duration::from_secs(2), SocketHints::default())
            .await
            .unwrap();
        assert!(stream.nodelay().unwrap());
        assert_eq!(peer, dialer.await.unwrap().unwrap().local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_accept_times_out_without_peer() {
        let listener = listen_tcp(loopback(), SocketHints::default()).unwrap();
        let wait = Duration::from_millis(50);
        let err = accept_one(&listener, wait, SocketHints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::AcceptTimeout(d) if d == wait));
    }
}
