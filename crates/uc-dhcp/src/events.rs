use std::net::Ipv4Addr;
use tokio::sync::broadcast;

use crate::lease_table::MacAddr;

/// Lease activity published by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpEvent {
    /// A DISCOVER was received, whether or not it could be answered.
    Discover { mac: MacAddr },
    Offer { mac: MacAddr, address: Ipv4Addr },
    Ack { mac: MacAddr, address: Ipv4Addr },
    Release { mac: MacAddr, address: Ipv4Addr },
}

pub type DhcpEventSender = broadcast::Sender<DhcpEvent>;

pub(crate) fn emit(events: Option<&DhcpEventSender>, event: DhcpEvent) {
    if let Some(tx) = events {
        // No subscribers is fine.
        let _ = tx.send(event);
    }
}
