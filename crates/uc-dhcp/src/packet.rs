//! BOOTP/DHCPv4 message layout (RFC 2131)

use std::net::Ipv4Addr;
use thiserror::Error;

use crate::lease_table::MacAddr;
use crate::options::{
    self, EncodeError, ReplyFields, OPTIONS_CAPACITY, OPT_MSG_TYPE, OPT_REQUESTED_IP,
};

/// DHCP magic cookie
pub const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

pub const BOOTREQUEST: u8 = 1;
pub const BOOTREPLY: u8 = 2;

/// Fixed header up to and including the magic cookie.
pub const OPTIONS_OFFSET: usize = 240;

/// Largest datagram this server reads or writes.
pub const MAX_MESSAGE_LEN: usize = OPTIONS_OFFSET + OPTIONS_CAPACITY;

/// Replies are zero-padded to the BOOTP minimum size.
pub const MIN_REPLY_LEN: usize = 300;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Packet too short: {0} bytes (minimum 240)")]
    TooShort(usize),
    #[error("Invalid magic cookie")]
    InvalidMagic,
    #[error("Not a BOOTREQUEST (op={0})")]
    NotRequest(u8),
}

/// Decoded inbound message: the fixed header plus a fixed-size copy of the
/// options region. Options past [`OPTIONS_CAPACITY`] are cut off and a short
/// options region is zero-filled.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; 16],
    pub magic: [u8; 4],
    pub options: [u8; OPTIONS_CAPACITY],
}

impl InboundMessage {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < OPTIONS_OFFSET {
            return Err(ParseError::TooShort(data.len()));
        }

        if data[236..240] != MAGIC_COOKIE {
            return Err(ParseError::InvalidMagic);
        }

        if data[0] != BOOTREQUEST {
            return Err(ParseError::NotRequest(data[0]));
        }

        let mut chaddr = [0u8; 16];
        chaddr.copy_from_slice(&data[28..44]);

        let raw_options = &data[OPTIONS_OFFSET..];
        let copied = raw_options.len().min(OPTIONS_CAPACITY);
        let mut options = [0u8; OPTIONS_CAPACITY];
        options[..copied].copy_from_slice(&raw_options[..copied]);

        Ok(InboundMessage {
            op: data[0],
            htype: data[1],
            hlen: data[2],
            hops: data[3],
            xid: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            secs: u16::from_be_bytes([data[8], data[9]]),
            flags: u16::from_be_bytes([data[10], data[11]]),
            ciaddr: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            yiaddr: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
            siaddr: Ipv4Addr::new(data[20], data[21], data[22], data[23]),
            giaddr: Ipv4Addr::new(data[24], data[25], data[26], data[27]),
            chaddr,
            magic: MAGIC_COOKIE,
            options,
        })
    }

    /// Client hardware address (first six bytes of chaddr).
    pub fn mac(&self) -> MacAddr {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.chaddr[..6]);
        MacAddr(mac)
    }

    pub fn option(&self, tag: u8) -> Option<&[u8]> {
        options::option_data(&self.options, tag)
    }

    /// Raw option 53 value.
    pub fn msg_type(&self) -> Option<u8> {
        self.option(OPT_MSG_TYPE)?.first().copied()
    }

    /// Option 50, only when exactly four bytes long.
    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        options::as_ipv4(self.option(OPT_REQUESTED_IP)?)
    }

    /// Build a reply to this message into `out` and return its length.
    ///
    /// The header is written from scratch: transaction id, hardware type,
    /// relay address and chaddr are echoed; secs, flags and hops are zeroed.
    /// `ciaddr` is only echoed for ACKs (RFC 2131 §4.3.1).
    pub fn write_reply(
        &self,
        out: &mut [u8; MAX_MESSAGE_LEN],
        yiaddr: Ipv4Addr,
        fields: &ReplyFields<'_>,
    ) -> Result<usize, EncodeError> {
        let ciaddr = match fields.msg_type {
            options::MessageType::Ack => self.ciaddr,
            _ => Ipv4Addr::UNSPECIFIED,
        };

        out.fill(0);
        out[0] = BOOTREPLY;
        out[1] = self.htype;
        out[2] = self.hlen;
        out[4..8].copy_from_slice(&self.xid.to_be_bytes());
        out[12..16].copy_from_slice(&ciaddr.octets());
        out[16..20].copy_from_slice(&yiaddr.octets());
        out[20..24].copy_from_slice(&fields.server_id.octets());
        out[24..28].copy_from_slice(&self.giaddr.octets());
        out[28..44].copy_from_slice(&self.chaddr);
        out[236..240].copy_from_slice(&MAGIC_COOKIE);

        let options_len = options::encode_reply_options(&mut out[OPTIONS_OFFSET..], fields)?;

        Ok((OPTIONS_OFFSET + options_len).max(MIN_REPLY_LEN))
    }
}
