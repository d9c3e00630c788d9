//! Listener construction.

use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpSocket};

const BACKLOG: u32 = 1024;

/// Bind `addr` so that every worker process can listen on the same port.
///
/// On unix `SO_REUSEPORT` lets the kernel spread incoming connections across
/// the workers. A port held by a socket without the option still fails.
pub fn bind_shared(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    #[cfg(unix)]
    socket.set_reuseport(true)?;
    socket.bind(addr)?;
    socket.listen(BACKLOG)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_two_shared_listeners_on_one_port() {
        let first = bind_shared("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = first.local_addr().unwrap();
        #[cfg(unix)]
        assert!(bind_shared(addr).is_ok());
        drop(first);
    }

    #[tokio::test]
    async fn test_port_held_exclusively_fails() {
        let exclusive = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = exclusive.local_addr().unwrap();
        assert!(bind_shared(addr).is_err());
    }
}
