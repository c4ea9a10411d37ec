use crate::packet::{Direction, Packet};
use fnv::FnvHashMap;
use indexmap::IndexSet;
use std::sync::{Arc, RwLock};

/// Timestamp-ordered packet collection.
///
/// The global store and each per-connection store share this contract.
/// Inserts are serialized by a write lock and keep the collection sorted
/// by ascending capture timestamp; every read operation works on a
/// snapshot taken at call time, so a concurrent insert can never corrupt
/// a traversal in progress.
#[derive(Default)]
pub struct PacketStore {
    packets: RwLock<Vec<Arc<Packet>>>,
}

impl PacketStore {
    pub fn new() -> Self {
        PacketStore::default()
    }

    /// Insert while keeping ascending-timestamp order.
    ///
    /// Scans from the back: packets almost always arrive in order, so the
    /// common case is a push.
    pub fn insert(&self, packet: Arc<Packet>) {
        let mut packets = self.packets.write().expect("packet store lock poisoned");
        let pos = packets
            .iter()
            .rposition(|p| p.ts <= packet.ts)
            .map(|i| i + 1)
            .unwrap_or(0);
        packets.insert(pos, packet);
    }

    /// Immutable snapshot of the current content, oldest first
    pub fn snapshot(&self) -> Vec<Arc<Packet>> {
        self.packets.read().expect("packet store lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.packets.read().expect("packet store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.packets.write().expect("packet store lock poisoned").clear();
    }

    /// All packets carrying the given sequence number in one direction
    pub fn packets_with_seq(&self, seq: i64, direction: Direction) -> Vec<Arc<Packet>> {
        self.snapshot()
            .into_iter()
            .filter(|p| p.seq == seq && p.direction() == direction)
            .collect()
    }

    /// Option kinds observed in one direction, in order of first
    /// appearance. No-Operation padding is excluded.
    pub fn unique_option_kinds(&self, direction: Direction) -> Vec<u8> {
        let mut kinds = IndexSet::new();
        for p in self.snapshot() {
            if p.direction() != direction {
                continue;
            }
            for opt in &p.options {
                let kind = opt.kind();
                if kind != 1 {
                    kinds.insert(kind);
                }
            }
        }
        kinds.into_iter().collect()
    }

    /// "The packet being acknowledged": greatest timestamp among packets
    /// whose sequence number is strictly less than `ack`.
    pub fn latest_with_seq_less_than(&self, ack: i64) -> Option<Arc<Packet>> {
        self.snapshot().iter().rev().find(|p| p.seq < ack).cloned()
    }

    /// First packet with the given acknowledgment number and flag
    pub fn find_with_ack_and_flag(&self, ack: i64, flag: u16) -> Option<Arc<Packet>> {
        self.snapshot()
            .iter()
            .find(|p| p.ack == ack && p.has_flag(flag))
            .cloned()
    }

    /// First packet with the given sequence number and flag
    pub fn find_with_seq_and_flag(&self, seq: i64, flag: u16) -> Option<Arc<Packet>> {
        self.snapshot()
            .iter()
            .find(|p| p.seq == seq && p.has_flag(flag))
            .cloned()
    }

    /// Packets carrying `flag`, split into (outgoing, incoming) subsets
    pub fn partition_by_flag(&self, flag: u16) -> (Vec<Arc<Packet>>, Vec<Arc<Packet>>) {
        let mut outgoing = Vec::new();
        let mut incoming = Vec::new();
        for p in self.snapshot() {
            if !p.has_flag(flag) {
                continue;
            }
            match p.direction() {
                Direction::Outgoing => outgoing.push(p),
                Direction::Incoming => incoming.push(p),
            }
        }
        (outgoing, incoming)
    }

    /// Packets flowing in one direction, oldest first
    pub fn in_direction(&self, direction: Direction) -> Vec<Arc<Packet>> {
        self.snapshot()
            .into_iter()
            .filter(|p| p.direction() == direction)
            .collect()
    }

    /// Sum of payload lengths over one direction
    pub fn bytes_in_direction(&self, direction: Direction) -> usize {
        self.snapshot()
            .iter()
            .filter(|p| p.direction() == direction)
            .map(|p| p.payload_len)
            .sum()
    }

    /// Number of retransmitted packets in one direction: for each group of
    /// packets sharing the same (seq, payload length, ack) triple, every
    /// occurrence past the first counts as one retransmission.
    pub fn retransmission_count(&self, direction: Direction) -> usize {
        let mut groups: FnvHashMap<(i64, usize, i64), usize> = FnvHashMap::default();
        for p in self.snapshot() {
            if p.direction() == direction {
                *groups.entry((p.seq, p.payload_len, p.ack)).or_insert(0) += 1;
            }
        }
        groups.values().map(|&n| n.saturating_sub(1)).sum()
    }

    /// Resolve a user-selected packet back to its object via the
    /// (seq, ack, payload length, flag signature) tuple.
    pub fn find_matching(
        &self,
        seq: i64,
        ack: i64,
        payload_len: usize,
        signature: &str,
    ) -> Option<Arc<Packet>> {
        self.snapshot()
            .iter()
            .find(|p| {
                p.seq == seq
                    && p.ack == ack
                    && p.payload_len == payload_len
                    && p.flag_signature() == signature
            })
            .cloned()
    }
}
