use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::events::{self, DhcpEvent, DhcpEventSender};
use crate::lease_table::{LeaseSlot, LeaseTable};
use crate::options::{MessageType, ReplyFields};
use crate::packet::{InboundMessage, MAX_MESSAGE_LEN};

/// Handle one inbound message. Returns the reply length written to `out`,
/// or `None` when nothing should be sent.
///
/// Conflicting or unknown REQUESTs are dropped without a NAK; the client
/// times out and restarts discovery.
pub fn handle_message(
    message: &InboundMessage,
    config: &ServerConfig,
    leases: &mut LeaseTable,
    out: &mut [u8; MAX_MESSAGE_LEN],
    events: Option<&DhcpEventSender>,
) -> Option<usize> {
    let Some(raw_type) = message.msg_type() else {
        debug!("Dropping DHCP packet from {} without message type", message.mac());
        return None;
    };

    let Some(msg_type) = MessageType::from_u8(raw_type) else {
        debug!("Ignoring unknown DHCP message type {}", raw_type);
        return None;
    };

    match msg_type {
        MessageType::Discover => handle_discover(message, config, leases, out, events),
        MessageType::Request => handle_request(message, config, leases, out, events),
        MessageType::Release => {
            handle_release(message, leases, events);
            None
        }
        MessageType::Offer
        | MessageType::Decline
        | MessageType::Ack
        | MessageType::Nak
        | MessageType::Inform => {
            debug!("Ignoring {} from {}", msg_type, message.mac());
            None
        }
    }
}

fn handle_discover(
    message: &InboundMessage,
    config: &ServerConfig,
    leases: &LeaseTable,
    out: &mut [u8; MAX_MESSAGE_LEN],
    events: Option<&DhcpEventSender>,
) -> Option<usize> {
    let mac = message.mac();
    info!("DHCPDISCOVER from {}", mac);
    events::emit(events, DhcpEvent::Discover { mac });

    // The candidate stays vacant until the client REQUESTs it.
    let Some(slot) = leases
        .lookup_by_mac(mac)
        .or_else(|| leases.allocate_vacant())
    else {
        warn!("No free lease for {}, dropping DHCPDISCOVER", mac);
        return None;
    };

    let len = build_reply(message, config, leases, slot, MessageType::Offer, out)?;
    let address = leases.entry(slot).address;
    info!("DHCPOFFER {} to {}", address, mac);
    events::emit(events, DhcpEvent::Offer { mac, address });
    Some(len)
}

fn handle_request(
    message: &InboundMessage,
    config: &ServerConfig,
    leases: &mut LeaseTable,
    out: &mut [u8; MAX_MESSAGE_LEN],
    events: Option<&DhcpEventSender>,
) -> Option<usize> {
    let mac = message.mac();

    let Some(requested_ip) = message.requested_ip() else {
        debug!("DHCPREQUEST from {} without a 4-byte requested IP", mac);
        return None;
    };

    info!("DHCPREQUEST from {} for {}", mac, requested_ip);

    let Some(slot) = leases.lookup_by_address(requested_ip) else {
        debug!("DHCPREQUEST from {} for {} outside the pool", mac, requested_ip);
        return None;
    };

    let holder = leases.entry(slot).mac;
    if !holder.is_zero() && holder != mac {
        warn!(
            "DHCPREQUEST from {} for {} which is leased to {}",
            mac, requested_ip, holder
        );
        return None;
    }

    let len = build_reply(message, config, leases, slot, MessageType::Ack, out)?;
    leases.bind(slot, mac);
    info!("DHCPACK {} to {}", requested_ip, mac);
    events::emit(events, DhcpEvent::Ack { mac, address: requested_ip });
    Some(len)
}

fn handle_release(
    message: &InboundMessage,
    leases: &mut LeaseTable,
    events: Option<&DhcpEventSender>,
) {
    let mac = message.mac();
    match leases.lookup_by_mac(mac) {
        Some(slot) => {
            let address = leases.entry(slot).address;
            leases.release(slot);
            info!("DHCPRELEASE from {} for {}", mac, address);
            events::emit(events, DhcpEvent::Release { mac, address });
        }
        None => debug!("DHCPRELEASE from {} with no lease", mac),
    }
}

fn build_reply(
    message: &InboundMessage,
    config: &ServerConfig,
    leases: &LeaseTable,
    slot: LeaseSlot,
    msg_type: MessageType,
    out: &mut [u8; MAX_MESSAGE_LEN],
) -> Option<usize> {
    let entry = leases.entry(slot);
    let fields = ReplyFields::from_config(config, msg_type, entry.lease_secs);
    match message.write_reply(out, entry.address, &fields) {
        Ok(len) => Some(len),
        Err(e) => {
            warn!("Failed to encode {} for {}: {}", msg_type, message.mac(), e);
            None
        }
    }
}
