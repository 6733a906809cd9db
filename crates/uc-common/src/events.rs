use tokio::sync::broadcast;

pub use uc_dhcp::DhcpEvent;

/// Event bus shared between services
pub struct EventBus {
    /// Lease activity (dhcp -> status watcher)
    pub dhcp: broadcast::Sender<DhcpEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            dhcp: broadcast::channel(64).0,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Link state as far as the host side is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkStatus {
    /// Waiting for the host to speak DHCP
    #[default]
    Idle,
    /// A DISCOVER was seen but nothing is bound yet
    Discovered,
    /// A client accepted a lease
    Bound,
}

impl LinkStatus {
    /// Fold an event into the status. Returns the new status when it changed.
    ///
    /// Once bound, later DISCOVERs and RELEASEs do not move the status back.
    pub fn observe(&mut self, event: &DhcpEvent) -> Option<LinkStatus> {
        let next = match (*self, event) {
            (LinkStatus::Idle, DhcpEvent::Discover { .. }) => LinkStatus::Discovered,
            (LinkStatus::Bound, _) => return None,
            (_, DhcpEvent::Ack { .. }) => LinkStatus::Bound,
            _ => return None,
        };
        *self = next;
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use uc_dhcp::MacAddr;

    const MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 1]);
    const ADDR: Ipv4Addr = Ipv4Addr::new(192, 168, 7, 2);

    #[test]
    fn test_status_transitions() {
        let mut status = LinkStatus::default();
        assert_eq!(
            status.observe(&DhcpEvent::Offer { mac: MAC, address: ADDR }),
            None
        );
        assert_eq!(
            status.observe(&DhcpEvent::Discover { mac: MAC }),
            Some(LinkStatus::Discovered)
        );
        assert_eq!(status.observe(&DhcpEvent::Discover { mac: MAC }), None);
        assert_eq!(
            status.observe(&DhcpEvent::Ack { mac: MAC, address: ADDR }),
            Some(LinkStatus::Bound)
        );
        assert_eq!(status.observe(&DhcpEvent::Discover { mac: MAC }), None);
        assert_eq!(
            status.observe(&DhcpEvent::Release { mac: MAC, address: ADDR }),
            None
        );
        assert_eq!(status, LinkStatus::Bound);
    }

    #[test]
    fn test_ack_without_discover_binds() {
        let mut status = LinkStatus::Idle;
        assert_eq!(
            status.observe(&DhcpEvent::Ack { mac: MAC, address: ADDR }),
            Some(LinkStatus::Bound)
        );
    }

    #[tokio::test]
    async fn test_bus_delivers_dhcp_events() {
        let bus = EventBus::new();
        let mut rx = bus.dhcp.subscribe();
        bus.dhcp.send(DhcpEvent::Discover { mac: MAC }).unwrap();
        assert_eq!(rx.recv().await.unwrap(), DhcpEvent::Discover { mac: MAC });
    }
}
