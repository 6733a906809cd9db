//! DHCP option scanning and reply option encoding (RFC 2132, RFC 3442).

use std::fmt;
use std::net::Ipv4Addr;
use thiserror::Error;
use tracing::warn;

use crate::config::{RouteOptions, ServerConfig, StaticRoute, WpadOption};

/// DHCP option codes
pub const OPT_SUBNET_MASK: u8 = 1;
pub const OPT_ROUTER: u8 = 3;
pub const OPT_DNS_SERVER: u8 = 6;
pub const OPT_DOMAIN_NAME: u8 = 15;
pub const OPT_REQUESTED_IP: u8 = 50;
pub const OPT_LEASE_TIME: u8 = 51;
pub const OPT_MSG_TYPE: u8 = 53;
pub const OPT_SERVER_ID: u8 = 54;
pub const OPT_CLASSLESS_ROUTES: u8 = 121;
/// Proxy auto-discovery URL. Not in any RFC; Windows clients ask for it.
pub const OPT_WPAD: u8 = 252;
pub const OPT_END: u8 = 255;

/// Largest value a one-byte option length can describe.
pub const MAX_OPTION_LEN: usize = 255;

/// Size of the options region: every option this server can emit at full
/// length (four fixed-size mandatory options, router, DNS, three variable
/// options) plus the END marker.
pub const OPTIONS_CAPACITY: usize = 3 + 5 * 6 + 3 * (2 + MAX_OPTION_LEN) + 1;

const _: () = assert!(OPTIONS_CAPACITY >= 275);

/// DHCP message types (option 53)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::Discover,
            2 => Self::Offer,
            3 => Self::Request,
            4 => Self::Decline,
            5 => Self::Ack,
            6 => Self::Nak,
            7 => Self::Release,
            8 => Self::Inform,
            _ => return None,
        })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discover => "DHCPDISCOVER",
            Self::Offer => "DHCPOFFER",
            Self::Request => "DHCPREQUEST",
            Self::Decline => "DHCPDECLINE",
            Self::Ack => "DHCPACK",
            Self::Nak => "DHCPNAK",
            Self::Release => "DHCPRELEASE",
            Self::Inform => "DHCPINFORM",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Option buffer overflow: {needed} bytes needed, {remaining} remaining")]
    BufferOverflow { needed: usize, remaining: usize },
    #[error("Option {tag} payload of {len} bytes exceeds 255")]
    OptionTooLong { tag: u8, len: usize },
}

/// Find the offset of option `tag` in a fixed-size options region.
///
/// Every entry is read as `[tag][len][len bytes]`, PAD and END included.
/// Returns `None` when the tag is absent or when an entry's declared length
/// runs past the end of the region.
pub fn find_option(options: &[u8], tag: u8) -> Option<usize> {
    let size = options.len();
    let mut i = 0;

    while i + 1 < size {
        let next = i + 2 + options[i + 1] as usize;
        if next > size {
            return None;
        }
        if options[i] == tag {
            return Some(i);
        }
        i = next;
    }

    None
}

/// Payload of option `tag`, if present and in bounds.
pub fn option_data(options: &[u8], tag: u8) -> Option<&[u8]> {
    let offset = find_option(options, tag)?;
    let len = options[offset + 1] as usize;
    options.get(offset + 2..offset + 2 + len)
}

/// Extract an IPv4 address from a 4-byte option payload.
pub fn as_ipv4(data: &[u8]) -> Option<Ipv4Addr> {
    let octets: [u8; 4] = data.try_into().ok()?;
    Some(Ipv4Addr::from(octets))
}

/// Cursor over a fixed output buffer. Writes that would not fit are
/// rejected before touching the buffer.
///
/// [`OptionWriter::option`] always leaves one byte free so that
/// [`OptionWriter::end`] can terminate the list.
#[derive(Debug)]
pub struct OptionWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> OptionWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.len
    }

    /// Append `[tag][len][data]`.
    pub fn option(&mut self, tag: u8, data: &[u8]) -> Result<&mut Self, EncodeError> {
        let len = u8::try_from(data.len()).map_err(|_| EncodeError::OptionTooLong {
            tag,
            len: data.len(),
        })?;

        // Room for the END marker stays reserved.
        let needed = 2 + data.len() + 1;
        if needed > self.remaining() {
            return Err(EncodeError::BufferOverflow {
                needed,
                remaining: self.remaining(),
            });
        }

        self.write(&[tag, len]);
        self.write(data);
        Ok(self)
    }

    /// Terminate the list and return its total length.
    pub fn end(mut self) -> Result<usize, EncodeError> {
        if self.remaining() == 0 {
            return Err(EncodeError::BufferOverflow {
                needed: 1,
                remaining: 0,
            });
        }
        self.write(&[OPT_END]);
        Ok(self.len)
    }

    fn write(&mut self, data: &[u8]) {
        self.buf[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
    }
}

/// Values that go into an OFFER or ACK.
#[derive(Debug, Clone, Copy)]
pub struct ReplyFields<'a> {
    pub msg_type: MessageType,
    pub server_id: Ipv4Addr,
    pub lease_secs: u32,
    pub subnet_mask: Ipv4Addr,
    pub router: Ipv4Addr,
    pub dns: Ipv4Addr,
    pub domain: &'a str,
    pub routes: &'a RouteOptions,
    pub wpad: &'a WpadOption,
}

impl<'a> ReplyFields<'a> {
    pub fn from_config(config: &'a ServerConfig, msg_type: MessageType, lease_secs: u32) -> Self {
        Self {
            msg_type,
            server_id: config.server_ip,
            lease_secs,
            subnet_mask: config.netmask,
            router: config.router,
            dns: config.dns,
            domain: &config.domain,
            routes: &config.routes,
            wpad: &config.wpad,
        }
    }
}

/// Encode the reply option list into `dest`, returning the bytes written.
///
/// Order: message type, server id, lease time, subnet mask, router, domain,
/// DNS, classless routes, WPAD, END. The first four are mandatory and fail
/// the encode if they do not fit; the rest are skipped when absent or when
/// the buffer is too full for them.
pub fn encode_reply_options(
    dest: &mut [u8],
    fields: &ReplyFields<'_>,
) -> Result<usize, EncodeError> {
    let mut out = OptionWriter::new(dest);

    out.option(OPT_MSG_TYPE, &[fields.msg_type as u8])?
        .option(OPT_SERVER_ID, &fields.server_id.octets())?
        .option(OPT_LEASE_TIME, &fields.lease_secs.to_be_bytes())?
        .option(OPT_SUBNET_MASK, &fields.subnet_mask.octets())?;

    if !fields.router.is_unspecified() {
        write_optional(&mut out, OPT_ROUTER, &fields.router.octets());
    }

    if !fields.domain.is_empty() {
        write_optional(&mut out, OPT_DOMAIN_NAME, truncated(fields.domain.as_bytes()));
    }

    if !fields.dns.is_unspecified() {
        write_optional(&mut out, OPT_DNS_SERVER, &fields.dns.octets());
    }

    if fields.routes.enabled {
        let mut payload = [0u8; MAX_OPTION_LEN];
        let len = encode_classless_routes(&fields.routes.routes, &mut payload);
        if len > 0 {
            write_optional(&mut out, OPT_CLASSLESS_ROUTES, &payload[..len]);
        }
    }

    if fields.wpad.enabled && !fields.wpad.url.is_empty() {
        write_optional(&mut out, OPT_WPAD, truncated(fields.wpad.url.as_bytes()));
    }

    out.end()
}

/// Encode routes as an RFC 3442 option 121 payload, returning its length.
///
/// Routes with a prefix over 32 are skipped. Once the next route would push
/// the payload past 255 bytes, it and everything after it are dropped.
pub fn encode_classless_routes(
    routes: &[StaticRoute],
    payload: &mut [u8; MAX_OPTION_LEN],
) -> usize {
    let mut len = 0;

    for route in routes {
        if route.prefix_len > 32 {
            warn!("Ignoring route with invalid prefix length {}", route.prefix_len);
            continue;
        }

        let octets = route.significant_octets();
        let entry_len = 1 + octets + 4;
        if len + entry_len > MAX_OPTION_LEN {
            warn!("Classless routes option full, skipping remaining entries");
            break;
        }

        payload[len] = route.prefix_len;
        payload[len + 1..len + 1 + octets]
            .copy_from_slice(&route.masked_network().octets()[..octets]);
        payload[len + 1 + octets..len + entry_len].copy_from_slice(&route.gateway.octets());
        len += entry_len;
    }

    len
}

fn write_optional(out: &mut OptionWriter<'_>, tag: u8, data: &[u8]) {
    if let Err(e) = out.option(tag, data) {
        warn!("Skipping DHCP option {}: {}", tag, e);
    }
}

fn truncated(data: &[u8]) -> &[u8] {
    &data[..data.len().min(MAX_OPTION_LEN)]
}
