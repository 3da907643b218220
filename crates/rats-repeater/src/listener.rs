//! TCP listeners for data and GPS clients

use std::net::{Ipv4Addr, SocketAddr};

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tracing::debug;

/// Queue depth for each GPS consumer
const GPS_QUEUE_DEPTH: usize = 64;

/// Bind a listener on all interfaces
pub fn listen_on(port: u16) -> std::io::Result<TcpListener> {
    listen_on_addr(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
}

/// Bind a listener with `SO_REUSEADDR` and a zero backlog
pub fn listen_on_addr(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(0)
}

/// Listening sockets handed to [`Repeater::repeat`](crate::Repeater::repeat)
#[derive(Debug, Default)]
pub struct Listeners {
    /// Framed data clients
    pub data: Option<TcpListener>,
    /// Raw GPS consumers
    pub gps: Option<TcpListener>,
}

/// A connected GPS consumer fed raw sentences
#[derive(Debug)]
pub(crate) struct GpsSink {
    pub(crate) peer: SocketAddr,
    pub(crate) tx: mpsc::Sender<Vec<u8>>,
}

impl GpsSink {
    /// Spawn a writer task for `stream`
    pub(crate) fn spawn(mut stream: TcpStream, peer: SocketAddr) -> Self {
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(GPS_QUEUE_DEPTH);
        tokio::spawn(async move {
            while let Some(data) = rx.recv().await {
                if let Err(e) = stream.write_all(&data).await {
                    debug!("GPS client {} went away: {}", peer, e);
                    break;
                }
            }
        });
        Self { peer, tx }
    }
}
