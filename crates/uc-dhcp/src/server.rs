use std::net::{Ipv4Addr, SocketAddr};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::events::DhcpEventSender;
use crate::packet::MAX_MESSAGE_LEN;
use crate::DhcpServer;

/// Inbound datagrams larger than this are truncated by the socket.
const RECV_BUFFER_LEN: usize = 1500;

/// Socket and receive task of a running [`DhcpServer`].
///
/// At most one receive task exists per service; `init` on a running service
/// stops the old task before binding again.
#[derive(Debug, Default)]
pub struct DhcpService {
    task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl DhcpService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `config`, bind the server socket and spawn the receive task.
    ///
    /// Must be called from within a tokio runtime. Configuration problems are
    /// reported before any socket is created.
    pub fn bind(config: ServerConfig, events: Option<DhcpEventSender>) -> Result<Self> {
        let server = DhcpServer::new(config)?.with_events(events);
        let port = server.config().bind_port;

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_broadcast(true)?;

        let addr = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), port);
        socket.bind(&addr.into())?;

        socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(socket.into())?;
        let local_addr = socket.local_addr()?;

        info!(
            "DHCP server listening on {} (pool {} x{})",
            local_addr,
            server.config().pool_start,
            server.config().pool_size
        );

        let task = tokio::spawn(serve(socket, server));

        Ok(Self {
            task: Some(task),
            local_addr: Some(local_addr),
        })
    }

    /// Start serving `config`, replacing any instance this service is
    /// already running.
    pub async fn init(
        &mut self,
        config: ServerConfig,
        events: Option<DhcpEventSender>,
    ) -> Result<()> {
        config.validate()?;
        self.shutdown().await;
        *self = Self::bind(config, events)?;
        Ok(())
    }

    /// Stop the receive task and close the socket. Safe to call repeatedly.
    pub async fn shutdown(&mut self) {
        self.local_addr = None;
        let Some(task) = self.task.take() else {
            return;
        };

        task.abort();
        // The socket is dropped together with the task future.
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                warn!("DHCP receive task ended abnormally: {}", e);
            }
        }
        info!("DHCP server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl Drop for DhcpService {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn serve(socket: UdpSocket, mut server: DhcpServer) {
    let mut buf = [0u8; RECV_BUFFER_LEN];
    let mut reply = [0u8; MAX_MESSAGE_LEN];

    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                warn!("DHCP recv error: {}", e);
                continue;
            }
        };

        let Some(reply_len) = server.handle_datagram(&buf[..len], &mut reply) else {
            continue;
        };

        // Clients have no address yet; always broadcast back to their port.
        let dest = SocketAddr::new(Ipv4Addr::BROADCAST.into(), src.port());
        match socket.try_send_to(&reply[..reply_len], dest) {
            Ok(sent) => debug!("Sent {} byte DHCP reply to {}", sent, dest),
            Err(e) => warn!("Failed to send DHCP reply to {}: {}", dest, e),
        }
    }
}
