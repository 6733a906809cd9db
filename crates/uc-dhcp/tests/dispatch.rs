use std::net::Ipv4Addr;
use tokio::sync::broadcast;

use uc_dhcp::options::{
    option_data, OPT_CLASSLESS_ROUTES, OPT_DNS_SERVER, OPT_DOMAIN_NAME, OPT_END, OPT_LEASE_TIME,
    OPT_MSG_TYPE, OPT_REQUESTED_IP, OPT_ROUTER, OPT_SERVER_ID, OPT_SUBNET_MASK, OPT_WPAD,
};
use uc_dhcp::packet::{MAGIC_COOKIE, OPTIONS_OFFSET};
use uc_dhcp::{
    DhcpEvent, DhcpServer, MacAddr, RouteOptions, ServerConfig, StaticRoute, WpadOption,
    MAX_MESSAGE_LEN,
};

const DISCOVER: u8 = 1;
const OFFER: u8 = 2;
const REQUEST: u8 = 3;
const DECLINE: u8 = 4;
const ACK: u8 = 5;
const RELEASE: u8 = 7;
const INFORM: u8 = 8;

fn client(n: u8) -> MacAddr {
    MacAddr([0x02, 0x00, 0x5e, 0x00, 0x00, n])
}

fn datagram(msg_type: u8, mac: MacAddr, extra: &[u8]) -> Vec<u8> {
    let mut pkt = vec![0u8; OPTIONS_OFFSET];
    pkt[0] = 1;
    pkt[1] = 1;
    pkt[2] = 6;
    pkt[4..8].copy_from_slice(&0xC0FFEEu32.to_be_bytes());
    pkt[28..34].copy_from_slice(&mac.octets());
    pkt[236..240].copy_from_slice(&MAGIC_COOKIE);
    pkt.extend_from_slice(&[OPT_MSG_TYPE, 1, msg_type]);
    pkt.extend_from_slice(extra);
    pkt.push(OPT_END);
    pkt
}

fn discover(mac: MacAddr) -> Vec<u8> {
    datagram(DISCOVER, mac, &[])
}

fn request(mac: MacAddr, ip: Ipv4Addr) -> Vec<u8> {
    let mut extra = vec![OPT_REQUESTED_IP, 4];
    extra.extend_from_slice(&ip.octets());
    datagram(REQUEST, mac, &extra)
}

fn release(mac: MacAddr) -> Vec<u8> {
    datagram(RELEASE, mac, &[])
}

fn small_pool(size: u8) -> ServerConfig {
    ServerConfig {
        pool_size: size,
        ..Default::default()
    }
}

struct Reply {
    bytes: Vec<u8>,
}

impl Reply {
    fn msg_type(&self) -> u8 {
        self.option(OPT_MSG_TYPE).unwrap()[0]
    }

    fn yiaddr(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.bytes[16], self.bytes[17], self.bytes[18], self.bytes[19])
    }

    fn option(&self, tag: u8) -> Option<&[u8]> {
        option_data(&self.bytes[OPTIONS_OFFSET..], tag)
    }
}

fn send(server: &mut DhcpServer, datagram: &[u8]) -> Option<Reply> {
    let mut out = [0u8; MAX_MESSAGE_LEN];
    let len = server.handle_datagram(datagram, &mut out)?;
    Some(Reply {
        bytes: out[..len].to_vec(),
    })
}

/// Run DISCOVER then REQUEST for the offered address.
fn acquire(server: &mut DhcpServer, mac: MacAddr) -> Option<Ipv4Addr> {
    let offer = send(server, &discover(mac))?;
    assert_eq!(offer.msg_type(), OFFER);
    let ack = send(server, &request(mac, offer.yiaddr()))?;
    assert_eq!(ack.msg_type(), ACK);
    Some(ack.yiaddr())
}

#[test]
fn test_pool_exhaustion_after_capacity_cycles() {
    let mut server = DhcpServer::new(small_pool(3)).unwrap();

    let mut assigned = Vec::new();
    for n in 1..=3 {
        assigned.push(acquire(&mut server, client(n)).expect("pool has room"));
    }
    assert_eq!(
        assigned,
        vec![
            Ipv4Addr::new(192, 168, 7, 2),
            Ipv4Addr::new(192, 168, 7, 3),
            Ipv4Addr::new(192, 168, 7, 4),
        ]
    );
    assert_eq!(server.leases().bound_count(), 3);

    assert!(send(&mut server, &discover(client(4))).is_none());
    assert_eq!(server.leases().bound_count(), 3);
}

#[test]
fn test_release_frees_slot_for_new_client() {
    let mut server = DhcpServer::new(small_pool(2)).unwrap();
    let first = acquire(&mut server, client(1)).unwrap();
    acquire(&mut server, client(2)).unwrap();

    assert!(send(&mut server, &release(client(1))).is_none());
    assert_eq!(server.leases().bound_count(), 1);

    let reused = acquire(&mut server, client(3)).unwrap();
    assert_eq!(reused, first);
}

#[test]
fn test_release_without_lease_is_ignored() {
    let mut server = DhcpServer::new(small_pool(2)).unwrap();
    acquire(&mut server, client(1)).unwrap();

    assert!(send(&mut server, &release(client(9))).is_none());
    assert_eq!(server.leases().bound_count(), 1);
}

#[test]
fn test_conflicting_request_is_dropped() {
    let mut server = DhcpServer::new(small_pool(2)).unwrap();
    let taken = acquire(&mut server, client(1)).unwrap();
    let before = server.leases().entries().to_vec();

    assert!(send(&mut server, &request(client(2), taken)).is_none());
    assert_eq!(server.leases().entries(), &before[..]);
}

#[test]
fn test_request_outside_pool_is_dropped() {
    let mut server = DhcpServer::new(small_pool(2)).unwrap();
    assert!(send(&mut server, &request(client(1), Ipv4Addr::new(10, 9, 9, 9))).is_none());
    assert_eq!(server.leases().bound_count(), 0);
}

#[test]
fn test_request_with_bad_option_length_is_dropped() {
    let mut server = DhcpServer::new(small_pool(2)).unwrap();
    let short = datagram(REQUEST, client(1), &[OPT_REQUESTED_IP, 3, 192, 168, 7]);
    assert!(send(&mut server, &short).is_none());

    let long = datagram(REQUEST, client(1), &[OPT_REQUESTED_IP, 5, 192, 168, 7, 2, 0]);
    assert!(send(&mut server, &long).is_none());

    let missing = datagram(REQUEST, client(1), &[]);
    assert!(send(&mut server, &missing).is_none());

    assert_eq!(server.leases().bound_count(), 0);
}

#[test]
fn test_request_without_discover_binds() {
    let mut server = DhcpServer::new(small_pool(4)).unwrap();
    let wanted = Ipv4Addr::new(192, 168, 7, 4);

    let ack = send(&mut server, &request(client(1), wanted)).unwrap();
    assert_eq!(ack.msg_type(), ACK);
    assert_eq!(ack.yiaddr(), wanted);

    let slot = server.leases().lookup_by_mac(client(1)).unwrap();
    assert_eq!(server.leases().entry(slot).address, wanted);
}

#[test]
fn test_renewal_from_same_client_is_acked() {
    let mut server = DhcpServer::new(small_pool(2)).unwrap();
    let ip = acquire(&mut server, client(1)).unwrap();

    let again = send(&mut server, &request(client(1), ip)).unwrap();
    assert_eq!(again.msg_type(), ACK);
    assert_eq!(server.leases().bound_count(), 1);

    // A bound client re-discovering gets its own address back.
    let offer = send(&mut server, &discover(client(1))).unwrap();
    assert_eq!(offer.yiaddr(), ip);
}

#[test]
fn test_discover_does_not_reserve() {
    let mut server = DhcpServer::new(small_pool(2)).unwrap();
    let a = send(&mut server, &discover(client(1))).unwrap();
    let b = send(&mut server, &discover(client(2))).unwrap();

    assert_eq!(a.yiaddr(), b.yiaddr());
    assert_eq!(server.leases().bound_count(), 0);

    // First REQUEST wins, the second client must start over.
    assert_eq!(send(&mut server, &request(client(1), a.yiaddr())).unwrap().msg_type(), ACK);
    assert!(send(&mut server, &request(client(2), b.yiaddr())).is_none());

    let retry = send(&mut server, &discover(client(2))).unwrap();
    assert_ne!(retry.yiaddr(), a.yiaddr());
}

#[test]
fn test_other_message_types_are_ignored() {
    let mut server = DhcpServer::new(small_pool(2)).unwrap();
    for msg_type in [OFFER, DECLINE, ACK, 6, INFORM, 0, 9, 200] {
        assert!(
            send(&mut server, &datagram(msg_type, client(1), &[])).is_none(),
            "message type {msg_type} should be ignored"
        );
    }
    assert_eq!(server.leases().bound_count(), 0);
}

#[test]
fn test_reply_carries_configured_options() {
    let config = ServerConfig {
        router: Ipv4Addr::new(192, 168, 7, 1),
        dns: Ipv4Addr::new(192, 168, 7, 53),
        domain: "usb.lan".to_string(),
        lease_secs: 1200,
        routes: RouteOptions {
            enabled: true,
            routes: vec![StaticRoute::new(
                Ipv4Addr::new(10, 0, 0, 0),
                24,
                Ipv4Addr::new(192, 168, 7, 1),
            )],
        },
        wpad: WpadOption {
            enabled: true,
            url: "http://192.168.7.1/wpad.dat".to_string(),
        },
        ..small_pool(2)
    };
    let mut server = DhcpServer::new(config).unwrap();

    let offer = send(&mut server, &discover(client(1))).unwrap();
    assert!(offer.bytes.len() >= 300);
    assert_eq!(offer.bytes[0], 2);
    assert_eq!(&offer.bytes[4..8], &0xC0FFEEu32.to_be_bytes());
    assert_eq!(&offer.bytes[28..34], &client(1).octets());

    assert_eq!(offer.option(OPT_SERVER_ID), Some(&[192, 168, 7, 1][..]));
    assert_eq!(offer.option(OPT_LEASE_TIME), Some(&1200u32.to_be_bytes()[..]));
    assert_eq!(offer.option(OPT_SUBNET_MASK), Some(&[255, 255, 255, 0][..]));
    assert_eq!(offer.option(OPT_ROUTER), Some(&[192, 168, 7, 1][..]));
    assert_eq!(offer.option(OPT_DNS_SERVER), Some(&[192, 168, 7, 53][..]));
    assert_eq!(offer.option(OPT_DOMAIN_NAME), Some(&b"usb.lan"[..]));
    assert_eq!(
        offer.option(OPT_CLASSLESS_ROUTES),
        Some(&[24, 10, 0, 0, 192, 168, 7, 1][..])
    );
    assert_eq!(offer.option(OPT_WPAD), Some(&b"http://192.168.7.1/wpad.dat"[..]));
}

#[test]
fn test_unset_options_are_omitted() {
    let mut server = DhcpServer::new(small_pool(2)).unwrap();
    let offer = send(&mut server, &discover(client(1))).unwrap();

    assert!(offer.option(OPT_ROUTER).is_none());
    assert!(offer.option(OPT_DNS_SERVER).is_none());
    assert!(offer.option(OPT_DOMAIN_NAME).is_none());
    assert!(offer.option(OPT_CLASSLESS_ROUTES).is_none());
    assert!(offer.option(OPT_WPAD).is_none());
}

#[test]
fn test_events_follow_lease_transitions() {
    let (tx, mut rx) = broadcast::channel(16);
    let mut server = DhcpServer::new(small_pool(2)).unwrap().with_events(Some(tx));
    let mac = client(1);

    let ip = acquire(&mut server, mac).unwrap();
    send(&mut server, &release(mac));

    assert_eq!(rx.try_recv().unwrap(), DhcpEvent::Discover { mac });
    assert_eq!(rx.try_recv().unwrap(), DhcpEvent::Offer { mac, address: ip });
    assert_eq!(rx.try_recv().unwrap(), DhcpEvent::Ack { mac, address: ip });
    assert_eq!(rx.try_recv().unwrap(), DhcpEvent::Release { mac, address: ip });
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_malformed_datagrams_do_not_panic() {
    let mut server = DhcpServer::new(small_pool(2)).unwrap();

    assert!(send(&mut server, &[]).is_none());
    assert!(send(&mut server, &[1u8; 239]).is_none());

    let mut no_cookie = discover(client(1));
    no_cookie[236..240].copy_from_slice(&[0, 0, 0, 0]);
    assert!(send(&mut server, &no_cookie).is_none());

    // Message type whose declared length runs past the options region.
    let mut overrun = discover(client(1));
    overrun.truncate(OPTIONS_OFFSET);
    overrun.resize(OPTIONS_OFFSET + 800, 0);
    overrun.extend_from_slice(&[OPT_MSG_TYPE, 200, DISCOVER]);
    assert!(send(&mut server, &overrun).is_none());

    let mut garbage = discover(client(1));
    garbage.truncate(OPTIONS_OFFSET);
    garbage.extend((0..MAX_MESSAGE_LEN * 2).map(|i| (i % 251) as u8));
    let _ = send(&mut server, &garbage);

    let mut filled = discover(client(1));
    filled.truncate(OPTIONS_OFFSET);
    filled.resize(MAX_MESSAGE_LEN, 0xFF);
    assert!(send(&mut server, &filled).is_none());
}
