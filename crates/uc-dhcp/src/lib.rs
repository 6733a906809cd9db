pub mod config;
pub mod error;
pub mod events;
pub mod lease_table;
pub mod options;
pub mod packet;
pub mod server;
pub mod state_machine;

pub use config::{RouteOptions, ServerConfig, StaticRoute, WpadOption};
pub use error::{DhcpError, Result};
pub use events::{DhcpEvent, DhcpEventSender};
pub use lease_table::{LeaseEntry, LeaseTable, MacAddr};
pub use packet::MAX_MESSAGE_LEN;
pub use server::DhcpService;

use tracing::debug;

use crate::packet::InboundMessage;

/// One DHCP server instance: its policy and the lease table it owns.
///
/// Handling is synchronous and must not run from two tasks at once;
/// [`DhcpService`] gives the instance to a single receive task.
pub struct DhcpServer {
    config: ServerConfig,
    leases: LeaseTable,
    events: Option<DhcpEventSender>,
}

impl DhcpServer {
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let leases = LeaseTable::from_config(&config);
        Ok(Self {
            config,
            leases,
            events: None,
        })
    }

    pub fn with_events(mut self, events: Option<DhcpEventSender>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn leases(&self) -> &LeaseTable {
        &self.leases
    }

    /// Decode a raw datagram, update the lease table and write any reply to
    /// `out`. Returns the reply length. Malformed input is dropped.
    pub fn handle_datagram(
        &mut self,
        datagram: &[u8],
        out: &mut [u8; MAX_MESSAGE_LEN],
    ) -> Option<usize> {
        let message = match InboundMessage::parse(datagram) {
            Ok(m) => m,
            Err(e) => {
                debug!("Dropping invalid DHCP packet: {}", e);
                return None;
            }
        };

        state_machine::handle_message(
            &message,
            &self.config,
            &mut self.leases,
            out,
            self.events.as_ref(),
        )
    }
}
