use crate::address::{Address, ConnectionIdent};
use crate::packet::{ConnectionId, Direction, Packet};
use crate::state::{advance, TcpStatus};
use crate::store::PacketStore;
use std::sync::{Arc, RwLock};

/// Most recently observed MSS and Window-Scale options for one direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DirectionAttrs {
    pub mss: Option<u16>,
    pub window_scale: Option<u8>,
}

/// One tracked connection: identity, protocol status, its own packet
/// store, and per-direction header attributes.
pub struct Connection {
    id: ConnectionId,
    ident: ConnectionIdent,
    status: RwLock<TcpStatus>,
    store: PacketStore,
    attrs: RwLock<[DirectionAttrs; 2]>,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, ident: ConnectionIdent) -> Self {
        Connection {
            id,
            ident,
            status: RwLock::new(TcpStatus::default()),
            store: PacketStore::new(),
            attrs: RwLock::new([DirectionAttrs::default(); 2]),
        }
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn ident(&self) -> &ConnectionIdent {
        &self.ident
    }

    /// First endpoint of the identity, used as the anchor for
    /// connection-scoped visibility filtering
    pub fn host(&self) -> &Address {
        &self.ident.host
    }

    pub fn host_two(&self) -> &Address {
        &self.ident.host_two
    }

    pub fn status(&self) -> TcpStatus {
        *self.status.read().expect("connection status lock poisoned")
    }

    pub fn store(&self) -> &PacketStore {
        &self.store
    }

    pub fn attrs(&self, direction: Direction) -> DirectionAttrs {
        self.attrs.read().expect("connection attrs lock poisoned")[direction.index()]
    }

    /// Store a packet and advance the protocol status.
    ///
    /// The packet being acknowledged is resolved before insertion, so a
    /// packet can never acknowledge itself. Callers serialize invocations
    /// per connection; see the session's registry lock.
    pub(crate) fn apply(&self, packet: &Arc<Packet>) {
        let acked = self.store.latest_with_seq_less_than(packet.ack);
        self.store.insert(Arc::clone(packet));

        {
            let mut attrs = self.attrs.write().expect("connection attrs lock poisoned");
            let slot = &mut attrs[packet.direction().index()];
            if let Some(mss) = packet.mss_option() {
                slot.mss = Some(mss);
            }
            if let Some(scale) = packet.window_scale_option() {
                slot.window_scale = Some(scale);
            }
        }

        let mut status = self.status.write().expect("connection status lock poisoned");
        let next = advance(*status, packet, acked.as_deref());
        if next != *status {
            debug!("connection {:x}: {} -> {}", self.id, *status, next);
            *status = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::testutil::{pkt, pkt_with_options};
    use crate::packet::Direction::{Incoming, Outgoing};
    use crate::packet::TcpOption;
    use pnet_packet::tcp::TcpFlags;

    fn conn() -> Connection {
        let a = Address::new("192.168.1.5".parse().unwrap(), 54321);
        let b = Address::new("93.184.216.34".parse().unwrap(), 80);
        Connection::new(42, ConnectionIdent::new(a, b))
    }

    #[test]
    fn apply_runs_handshake_to_established() {
        let c = conn();
        assert_eq!(c.status(), TcpStatus::Unknown);
        c.apply(&pkt(0, Outgoing, TcpFlags::SYN as u16, 1000, 0, 0));
        assert_eq!(c.status(), TcpStatus::SynSent);
        c.apply(&pkt(10, Incoming, TcpFlags::SYN as u16 | TcpFlags::ACK as u16, 5000, 1001, 0));
        assert_eq!(c.status(), TcpStatus::SynReceived);
        c.apply(&pkt(20, Outgoing, TcpFlags::ACK as u16, 1001, 5001, 0));
        assert_eq!(c.status(), TcpStatus::Established);
        assert_eq!(c.store().len(), 3);
    }

    #[test]
    fn apply_tracks_per_direction_attributes() {
        let c = conn();
        c.apply(&pkt_with_options(
            0,
            Outgoing,
            TcpFlags::SYN as u16,
            1000,
            0,
            0,
            vec![TcpOption::Mss(1460), TcpOption::WindowScale(7)],
        ));
        c.apply(&pkt_with_options(
            10,
            Incoming,
            TcpFlags::SYN as u16 | TcpFlags::ACK as u16,
            5000,
            1001,
            0,
            vec![TcpOption::Mss(1400)],
        ));
        let out = c.attrs(Outgoing);
        assert_eq!(out.mss, Some(1460));
        assert_eq!(out.window_scale, Some(7));
        let inc = c.attrs(Incoming);
        assert_eq!(inc.mss, Some(1400));
        assert_eq!(inc.window_scale, None);
    }
}
