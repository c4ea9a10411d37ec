use crate::packet::Packet;
use pnet_packet::tcp::TcpFlags;
use serde::Serialize;
use std::fmt;

/// Protocol status of a connection, inferred from the observed traffic.
///
/// `Unknown` is the status of a connection whose handshake was never
/// observed; it behaves like `Closed` for transition purposes so that
/// mid-stream captures can still be promoted to `Established`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum TcpStatus {
    Closed,
    SynSent,
    SynReceived,
    Established,
    CloseWait,
    LastAck,
    FinWait1,
    FinWait2,
    Closing,
    TimeWait,
    Rejected,
    Unknown,
}

impl Default for TcpStatus {
    fn default() -> Self {
        TcpStatus::Unknown
    }
}

impl fmt::Display for TcpStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            TcpStatus::Closed => "CLOSED",
            TcpStatus::SynSent => "SYN_SENT",
            TcpStatus::SynReceived => "SYN_RECEIVED",
            TcpStatus::Established => "ESTABLISHED",
            TcpStatus::CloseWait => "CLOSE_WAIT",
            TcpStatus::LastAck => "LAST_ACK",
            TcpStatus::FinWait1 => "FIN_WAIT_1",
            TcpStatus::FinWait2 => "FIN_WAIT_2",
            TcpStatus::Closing => "CLOSING",
            TcpStatus::TimeWait => "TIME_WAIT",
            TcpStatus::Rejected => "REJECTED",
            TcpStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Evaluate one status transition.
///
/// `acked` is "the packet being acknowledged": the most recent prior packet
/// whose sequence number is strictly less than `packet.ack`, resolved by
/// the caller against the connection store *before* inserting `packet`.
/// A packet with RST forces `Rejected` from any state. When no rule
/// matches, the status is left unchanged.
pub fn advance(current: TcpStatus, packet: &Packet, acked: Option<&Packet>) -> TcpStatus {
    use TcpStatus::*;

    if packet.has_flag(TcpFlags::RST as u16) {
        return Rejected;
    }

    let syn = packet.has_flag(TcpFlags::SYN as u16);
    let ack = packet.has_flag(TcpFlags::ACK as u16);
    let fin = packet.has_flag(TcpFlags::FIN as u16);
    let psh = packet.has_flag(TcpFlags::PSH as u16);
    let acked_has = |flag: u16| acked.is_some_and(|p| p.has_flag(flag));

    match current {
        Closed | Unknown => {
            if syn && ack && acked_has(TcpFlags::SYN as u16) {
                SynReceived
            } else if syn {
                SynSent
            } else if (psh || packet.payload_len > 20) && acked_has(TcpFlags::PSH as u16) {
                // mid-stream capture: data flowing both ways
                Established
            } else if fin || ack {
                Closed
            } else {
                current
            }
        }
        SynSent => {
            if syn && ack && acked_has(TcpFlags::SYN as u16) {
                SynReceived
            } else if syn && !ack {
                // simultaneous open
                SynReceived
            } else if ack && acked_has(TcpFlags::SYN as u16) && acked_has(TcpFlags::ACK as u16) {
                Established
            } else {
                current
            }
        }
        SynReceived => {
            // handshake-completing ACK, accepted from either side
            if ack && acked_has(TcpFlags::ACK as u16) {
                Established
            } else {
                current
            }
        }
        Established => {
            if fin {
                if packet.is_outgoing() {
                    FinWait1
                } else {
                    CloseWait
                }
            } else if ack && acked_has(TcpFlags::FIN as u16) {
                CloseWait
            } else {
                current
            }
        }
        CloseWait => {
            if fin && packet.is_outgoing() {
                LastAck
            } else {
                current
            }
        }
        LastAck => {
            if ack && !packet.is_outgoing() && acked_has(TcpFlags::FIN as u16) {
                Closed
            } else {
                current
            }
        }
        FinWait1 => {
            if packet.is_outgoing() && ack && acked_has(TcpFlags::FIN as u16) {
                if acked_has(TcpFlags::ACK as u16) {
                    TimeWait
                } else {
                    Closing
                }
            } else if !packet.is_outgoing() && ack && !fin && !syn {
                FinWait2
            } else {
                current
            }
        }
        FinWait2 => {
            if packet.is_outgoing() && ack && acked_has(TcpFlags::FIN as u16) {
                TimeWait
            } else {
                current
            }
        }
        Closing | TimeWait | Rejected => current,
    }
}
