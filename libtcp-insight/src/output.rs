use crate::config::DisplayConfig;
use crate::connection::Connection;
use crate::features::{detect, Sensitivity};
use crate::packet::{option_kind_name, Direction, Packet};
use crate::state::TcpStatus;
use indexmap::IndexMap;
use pnet_packet::tcp::TcpFlags;
use std::fmt::Write;

/// One summary line per packet. Fields controlled by a display toggle are
/// omitted entirely when the toggle is off.
pub fn format_packet_line(packet: &Packet, display: &DisplayConfig) -> String {
    let mut line = format!(
        "{}.{:06} {} {} > {}",
        packet.ts.secs, packet.ts.micros, packet.version, packet.source, packet.destination
    );
    if display.header_flags {
        let _ = write!(line, " [{}]", packet.flag_signature());
    }
    if display.ack_seq {
        let _ = write!(line, " seq={} ack={}", packet.seq, packet.ack);
    }
    let _ = write!(line, " win={}", packet.window);
    if display.tcp_options && !packet.options.is_empty() {
        let names: Vec<&str> = packet
            .options
            .iter()
            .filter(|o| o.kind() != 1)
            .map(|o| option_kind_name(o.kind()))
            .collect();
        if !names.is_empty() {
            let _ = write!(line, " opts=<{}>", names.join(","));
        }
    }
    if display.length {
        let _ = write!(line, " len={}", packet.payload_len);
    }
    line
}

const FLAG_NAMES: [(u16, &str); 6] = [
    (TcpFlags::URG as u16, "URG"),
    (TcpFlags::ACK as u16, "ACK"),
    (TcpFlags::PSH as u16, "PSH"),
    (TcpFlags::RST as u16, "RST"),
    (TcpFlags::SYN as u16, "SYN"),
    (TcpFlags::FIN as u16, "FIN"),
];

/// Deterministic, ordered textual report for one connection.
///
/// Sections: general info, TCP options, detected features, per-flag
/// sent/received counts. A section is omitted entirely when its toggle is
/// off or it has no content.
pub fn connection_report(
    conn: &Connection,
    display: &DisplayConfig,
    sensitivity: Sensitivity,
) -> String {
    let mut out = String::new();
    let store = conn.store();

    if display.general_info {
        let _ = writeln!(out, "Connection: {}", conn.ident());
        let _ = writeln!(out, "  status: {}", conn.status());
        let _ = writeln!(
            out,
            "  packets: {} sent / {} received",
            store.in_direction(Direction::Outgoing).len(),
            store.in_direction(Direction::Incoming).len()
        );
        let _ = writeln!(
            out,
            "  bytes: {} sent / {} received",
            store.bytes_in_direction(Direction::Outgoing),
            store.bytes_in_direction(Direction::Incoming)
        );
        let retrans_out = store.retransmission_count(Direction::Outgoing);
        let retrans_in = store.retransmission_count(Direction::Incoming);
        if retrans_out + retrans_in > 0 {
            let _ = writeln!(
                out,
                "  retransmissions: {retrans_out} sent / {retrans_in} received"
            );
        }
    }

    if display.tcp_options {
        let mut section = String::new();
        for (direction, label) in [(Direction::Outgoing, "sent"), (Direction::Incoming, "received")]
        {
            let kinds = store.unique_option_kinds(direction);
            if kinds.is_empty() {
                continue;
            }
            let names: Vec<&str> = kinds.iter().map(|&k| option_kind_name(k)).collect();
            let _ = write!(section, "  options {label}: {}", names.join(", "));
            let attrs = conn.attrs(direction);
            if let Some(mss) = attrs.mss {
                let _ = write!(section, " (MSS {mss}");
                if let Some(scale) = attrs.window_scale {
                    let _ = write!(section, ", WScale {scale}");
                }
                let _ = write!(section, ")");
            } else if let Some(scale) = attrs.window_scale {
                let _ = write!(section, " (WScale {scale})");
            }
            section.push('\n');
        }
        if !section.is_empty() {
            out.push_str("TCP options:\n");
            out.push_str(&section);
        }
    }

    if display.tcp_features {
        let report = detect(conn, sensitivity);
        let mut section = String::new();
        for (name, verdict) in [
            ("delayed ACK", report.delayed_ack),
            ("Nagle coalescing", report.nagle),
            ("slow start", report.slow_start),
        ] {
            if verdict.outgoing {
                let _ = writeln!(section, "  {name} (outgoing)");
            }
            if verdict.incoming {
                let _ = writeln!(section, "  {name} (incoming)");
            }
        }
        if !section.is_empty() {
            out.push_str("Detected features:\n");
            out.push_str(&section);
        }
    }

    if display.header_flags {
        let mut section = String::new();
        for (flag, name) in FLAG_NAMES {
            let (sent, received) = store.partition_by_flag(flag);
            if sent.is_empty() && received.is_empty() {
                continue;
            }
            let _ = writeln!(
                section,
                "  {name}: {} sent / {} received",
                sent.len(),
                received.len()
            );
        }
        if !section.is_empty() {
            out.push_str("Header flags:\n");
            out.push_str(&section);
        }
    }

    out
}

/// Aggregate connection counts grouped by status
pub fn format_status_summary(summary: &IndexMap<TcpStatus, usize>) -> String {
    let mut out = String::new();
    for (status, count) in summary {
        let _ = writeln!(out, "{status}: {count}");
    }
    out
}
