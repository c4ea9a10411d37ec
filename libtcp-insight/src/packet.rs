use crate::address::Address;
use crate::duration::Duration;
use pnet_packet::tcp::TcpFlags;
use std::fmt;
use std::net::IpAddr;

/// Unique `Connection` identifier
pub type ConnectionId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    pub fn from_u8(v: u8) -> Option<IpVersion> {
        match v {
            4 => Some(IpVersion::V4),
            6 => Some(IpVersion::V6),
            _ => None,
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IpVersion::V4 => f.write_str("IPv4"),
            IpVersion::V6 => f.write_str("IPv6"),
        }
    }
}

/// Capture direction: `Outgoing` is traffic sent by the locally observed
/// endpoint, as decided by the session's identity resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Outgoing,
    Incoming,
}

impl Direction {
    pub fn flip(self) -> Direction {
        match self {
            Direction::Outgoing => Direction::Incoming,
            Direction::Incoming => Direction::Outgoing,
        }
    }

    /// Stable index for per-direction arrays
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Direction::Outgoing => 0,
            Direction::Incoming => 1,
        }
    }
}

/// TCP option: kind plus decoded value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TcpOption {
    Mss(u16),
    WindowScale(u8),
    SackPermitted,
    Sack(Vec<(u32, u32)>),
    Timestamp(u32, u32),
    NoOperation,
    EndOfOptions,
    Other(u8),
}

impl TcpOption {
    /// RFC option kind number
    pub fn kind(&self) -> u8 {
        match self {
            TcpOption::EndOfOptions => 0,
            TcpOption::NoOperation => 1,
            TcpOption::Mss(_) => 2,
            TcpOption::WindowScale(_) => 3,
            TcpOption::SackPermitted => 4,
            TcpOption::Sack(_) => 5,
            TcpOption::Timestamp(_, _) => 8,
            TcpOption::Other(k) => *k,
        }
    }
}

/// Human-readable name of an option kind number
pub fn option_kind_name(kind: u8) -> &'static str {
    match kind {
        0 => "EOL",
        1 => "NOP",
        2 => "MSS",
        3 => "WScale",
        4 => "SACK-Permitted",
        5 => "SACK",
        8 => "Timestamp",
        _ => "Other",
    }
}

/// Decoded header record handed over by the capture collaborator.
#[derive(Clone, Debug)]
pub struct RawSegment {
    pub ip_version: u8,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    /// `pnet_packet::tcp::TcpFlags` bits
    pub flags: u16,
    pub window: u16,
    pub options: Vec<TcpOption>,
    pub header_len: usize,
    pub payload_len: usize,
    pub ts: Duration,
}

/// Normalized packet, before direction and connection assignment.
#[derive(Debug)]
pub struct PacketDraft {
    pub ts: Duration,
    pub version: IpVersion,
    pub source: Address,
    pub destination: Address,
    pub seq: i64,
    pub ack: i64,
    pub window: u16,
    pub payload_len: usize,
    pub header_len: usize,
    pub flags: u16,
    pub options: Vec<TcpOption>,
}

impl PacketDraft {
    /// Final step of packet construction. Direction and owning connection
    /// are fixed here and immutable afterwards.
    pub fn bind(self, direction: Direction, conn: ConnectionId) -> Packet {
        Packet {
            ts: self.ts,
            version: self.version,
            source: self.source,
            destination: self.destination,
            seq: self.seq,
            ack: self.ack,
            window: self.window,
            payload_len: self.payload_len,
            header_len: self.header_len,
            flags: self.flags,
            options: self.options,
            direction,
            conn,
        }
    }
}

/// A normalized TCP packet as stored by the engine.
///
/// Sequence and acknowledgment numbers are 32-bit values widened to `i64`
/// so that ordering comparisons cannot trip over wraparound casts.
#[derive(Debug)]
pub struct Packet {
    pub ts: Duration,
    pub version: IpVersion,
    pub source: Address,
    pub destination: Address,
    pub seq: i64,
    pub ack: i64,
    pub window: u16,
    pub payload_len: usize,
    pub header_len: usize,
    /// `pnet_packet::tcp::TcpFlags` bits
    pub flags: u16,
    pub options: Vec<TcpOption>,
    direction: Direction,
    conn: ConnectionId,
}

impl Packet {
    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Key of the owning connection (non-owning back-reference)
    #[inline]
    pub fn connection(&self) -> ConnectionId {
        self.conn
    }

    #[inline]
    pub fn is_outgoing(&self) -> bool {
        self.direction == Direction::Outgoing
    }

    #[inline]
    pub fn has_flag(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }

    /// ACK set, no SYN/FIN/RST, empty payload
    pub fn is_pure_ack(&self) -> bool {
        self.has_flag(TcpFlags::ACK as u16)
            && !self.has_flag(TcpFlags::SYN as u16)
            && !self.has_flag(TcpFlags::FIN as u16)
            && !self.has_flag(TcpFlags::RST as u16)
            && self.payload_len == 0
    }

    #[inline]
    pub fn carries_data(&self) -> bool {
        self.payload_len > 0
    }

    /// Canonical textual form of the six header flags, e.g. `"ACK SYN"`.
    /// Used to resolve a user-selected packet back to its object.
    pub fn flag_signature(&self) -> String {
        const NAMED: [(u16, &str); 6] = [
            (TcpFlags::URG as u16, "URG"),
            (TcpFlags::ACK as u16, "ACK"),
            (TcpFlags::PSH as u16, "PSH"),
            (TcpFlags::RST as u16, "RST"),
            (TcpFlags::SYN as u16, "SYN"),
            (TcpFlags::FIN as u16, "FIN"),
        ];
        let names: Vec<&str> = NAMED
            .iter()
            .filter(|(f, _)| self.flags & f != 0)
            .map(|&(_, n)| n)
            .collect();
        names.join(" ")
    }

    pub fn mss_option(&self) -> Option<u16> {
        self.options.iter().find_map(|o| match o {
            TcpOption::Mss(v) => Some(*v),
            _ => None,
        })
    }

    pub fn window_scale_option(&self) -> Option<u8> {
        self.options.iter().find_map(|o| match o {
            TcpOption::WindowScale(v) => Some(*v),
            _ => None,
        })
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::sync::Arc;

    /// Build a packet between fixed test endpoints. `Outgoing` packets go
    /// from the remote (93.184.216.34:80) towards the local host
    /// (192.168.1.5:54321), matching the session's direction rule.
    pub(crate) fn pkt(
        ts_ms: u64,
        direction: Direction,
        flags: u16,
        seq: i64,
        ack: i64,
        payload_len: usize,
    ) -> Arc<Packet> {
        pkt_with_options(ts_ms, direction, flags, seq, ack, payload_len, Vec::new())
    }

    pub(crate) fn pkt_with_options(
        ts_ms: u64,
        direction: Direction,
        flags: u16,
        seq: i64,
        ack: i64,
        payload_len: usize,
        options: Vec<TcpOption>,
    ) -> Arc<Packet> {
        let local = Address::new("192.168.1.5".parse().unwrap(), 54321);
        let remote = Address::new("93.184.216.34".parse().unwrap(), 80);
        let (source, destination) = match direction {
            Direction::Outgoing => (remote, local),
            Direction::Incoming => (local, remote),
        };
        let draft = PacketDraft {
            ts: Duration::from_millis(ts_ms),
            version: IpVersion::V4,
            source,
            destination,
            seq,
            ack,
            window: 64240,
            payload_len,
            header_len: 20,
            flags,
            options,
        };
        Arc::new(draft.bind(direction, 1))
    }
}
