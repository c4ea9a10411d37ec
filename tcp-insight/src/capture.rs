//! pcap/pcap-ng reader: iterates over file blocks, abstracts the format
//! (datalink, endianness, timestamp resolution) and feeds decoded TCP
//! segments to the ingest queue.

use libtcp_insight::{Duration, IngestQueue, RawSegment, Session, TcpOption};
use pcap_parser::data::{get_packetdata, PacketData};
use pcap_parser::pcapng::{InterfaceDescriptionBlock, OptionCode};
use pcap_parser::{create_reader, Block, Linktype, PcapBlockOwned, PcapError};
use pnet_packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet_packet::ip::IpNextHeaderProtocols;
use pnet_packet::ipv4::Ipv4Packet;
use pnet_packet::ipv6::Ipv6Packet;
use pnet_packet::tcp::{TcpOptionNumbers, TcpPacket};
use pnet_packet::Packet as _;
use std::io::{self, Error, ErrorKind, Read};
use std::net::IpAddr;

const MICROS_PER_SEC: u64 = 1_000_000;

/// Information related to a network interface used for capture
struct InterfaceInfo {
    link_type: Linktype,
    if_tsresol: u8,
    ts_unit: u64,
    if_tsoffset: u64,
}

fn pcapng_build_interface(idb: &InterfaceDescriptionBlock) -> InterfaceInfo {
    // extract if_tsoffset and if_tsresol
    let mut if_tsresol: u8 = 6;
    let mut ts_unit: u64 = MICROS_PER_SEC;
    let mut if_tsoffset: u64 = 0;
    for opt in idb.options.iter() {
        match opt.code {
            OptionCode::IfTsresol => {
                if !opt.value.is_empty() {
                    if_tsresol = opt.value[0];
                    if let Some(resol) = pcap_parser::build_ts_resolution(if_tsresol) {
                        ts_unit = resol;
                    }
                }
            }
            OptionCode::IfTsoffset => {
                if opt.value.len() >= 8 {
                    let int_bytes =
                        <[u8; 8]>::try_from(&opt.value[..8]).expect("Convert bytes to u64");
                    if_tsoffset = u64::from_le_bytes(int_bytes);
                }
            }
            _ => (),
        }
    }
    InterfaceInfo {
        link_type: idb.linktype,
        if_tsresol,
        ts_unit,
        if_tsoffset,
    }
}

#[derive(Debug, Default)]
pub struct CaptureStats {
    pub blocks: usize,
    pub packets: usize,
    pub tcp_segments: usize,
}

/// Read all pcap data from `input` and queue every decoded TCP segment.
///
/// Stops early, without error, when the session's capturing flag is
/// cleared.
pub fn process_reader(
    input: &mut (dyn Read + Send),
    session: &Session,
    queue: &IngestQueue,
) -> Result<CaptureStats, io::Error> {
    let mut reader = create_reader(128 * 1024, input)
        .map_err(|e| Error::new(ErrorKind::InvalidData, format!("pcap reader: {e:?}")))?;

    let mut stats = CaptureStats::default();
    let mut interfaces: Vec<InterfaceInfo> = Vec::new();
    let mut last_incomplete_index = 0;

    loop {
        if !session.is_capturing() {
            info!("capture stopped, aborting file read");
            break;
        }
        match reader.next() {
            Ok((offset, block)) => {
                stats.blocks += 1;
                handle_block(&block, &mut interfaces, &mut stats, queue);
                reader.consume_noshift(offset);
            }
            Err(PcapError::Eof) => break,
            Err(PcapError::Incomplete(_)) => {
                if last_incomplete_index == stats.blocks && reader.reader_exhausted() {
                    warn!("Could not read complete data block.");
                    warn!("Hint: the reader buffer size may be too small, or the input file may be truncated.");
                    break;
                }
                last_incomplete_index = stats.blocks;
                reader
                    .refill()
                    .map_err(|e| Error::new(ErrorKind::InvalidData, format!("refill: {e:?}")))?;
            }
            Err(e) => {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("error while reading: {e:?}"),
                ));
            }
        }
    }

    Ok(stats)
}

fn handle_block(
    block: &PcapBlockOwned,
    interfaces: &mut Vec<InterfaceInfo>,
    stats: &mut CaptureStats,
    queue: &IngestQueue,
) {
    match block {
        PcapBlockOwned::LegacyHeader(hdr) => {
            let precision = if hdr.is_nanosecond_precision() { 9 } else { 6 };
            let ts_unit = if hdr.is_nanosecond_precision() {
                1_000_000_000
            } else {
                1_000_000
            };
            interfaces.push(InterfaceInfo {
                link_type: hdr.network,
                if_tsresol: precision,
                ts_unit,
                if_tsoffset: 0,
            });
            trace!("Legacy pcap, link type: {}", hdr.network);
        }
        PcapBlockOwned::Legacy(b) => {
            stats.packets += 1;
            let Some(if_info) = interfaces.first() else {
                warn!("Legacy packet block before file header");
                return;
            };
            let ts = if if_info.if_tsresol == 6 {
                Duration::new(b.ts_sec, b.ts_usec)
            } else {
                Duration::new(b.ts_sec, b.ts_usec / 1000)
            };
            let blen = b.caplen as usize;
            match get_packetdata(b.data, if_info.link_type, blen) {
                Some(data) => handle_packetdata(data, ts, stats, queue),
                None => warn!("Parsing PacketData failed (Legacy Packet)"),
            }
        }
        PcapBlockOwned::NG(Block::SectionHeader(_)) => {
            // reset section-related variables
            interfaces.clear();
        }
        PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
            interfaces.push(pcapng_build_interface(idb));
        }
        PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
            stats.packets += 1;
            let Some(if_info) = interfaces.get(epb.if_id as usize) else {
                warn!("EPB referencing unknown interface {}", epb.if_id);
                return;
            };
            let unit = if_info.ts_unit;
            let (ts_sec, ts_frac) =
                pcap_parser::build_ts(epb.ts_high, epb.ts_low, if_info.if_tsoffset, unit);
            let ts_micros = if unit == MICROS_PER_SEC {
                ts_frac
            } else {
                ((u64::from(ts_frac) * MICROS_PER_SEC) / unit) as u32
            };
            let ts = Duration::new(ts_sec, ts_micros);
            match get_packetdata(epb.data, if_info.link_type, epb.caplen as usize) {
                Some(data) => handle_packetdata(data, ts, stats, queue),
                None => warn!("Parsing PacketData failed (EnhancedPacket)"),
            }
        }
        PcapBlockOwned::NG(Block::InterfaceStatistics(_))
        | PcapBlockOwned::NG(Block::NameResolution(_)) => (),
        _ => {
            debug!("unsupported block");
        }
    }
}

fn handle_packetdata(data: PacketData, ts: Duration, stats: &mut CaptureStats, queue: &IngestQueue) {
    match data {
        PacketData::L2(data) => handle_l2(data, ts, stats, queue),
        PacketData::L3(ethertype, data) => handle_l3(EtherType(ethertype), data, ts, stats, queue),
        PacketData::L4(_, _) => debug!("no L3 header, ignoring packet"),
        PacketData::Unsupported(_) => warn!("unsupported link type"),
    }
}

fn handle_l2(data: &[u8], ts: Duration, stats: &mut CaptureStats, queue: &IngestQueue) {
    match EthernetPacket::new(data) {
        Some(eth) => handle_l3(eth.get_ethertype(), eth.payload(), ts, stats, queue),
        None => {
            // packet too small to be ethernet
        }
    }
}

fn handle_l3(
    ethertype: EtherType,
    data: &[u8],
    ts: Duration,
    stats: &mut CaptureStats,
    queue: &IngestQueue,
) {
    if data.is_empty() {
        return;
    }
    match ethertype {
        EtherTypes::Ipv4 => handle_l3_ipv4(data, ts, stats, queue),
        EtherTypes::Ipv6 => handle_l3_ipv6(data, ts, stats, queue),
        EtherTypes::Vlan => {
            // 802.1q: skip the tag and dispatch on the inner ethertype
            if data.len() >= 4 {
                let inner = EtherType(u16::from_be_bytes([data[0], data[1]]));
                handle_l3(inner, &data[4..], ts, stats, queue);
            }
        }
        _ => {
            debug!("Unsupported ethertype {} (0x{:x})", ethertype, ethertype.0);
        }
    }
}

fn handle_l3_ipv4(data: &[u8], ts: Duration, stats: &mut CaptureStats, queue: &IngestQueue) {
    let Some(ipv4) = Ipv4Packet::new(data) else {
        warn!("Could not build IPv4 packet from data");
        return;
    };
    // remove ethernet padding
    let payload = {
        let total = ipv4.get_total_length() as usize;
        let header = ipv4.get_header_length() as usize * 4;
        if total <= data.len() && total >= header {
            &data[header..total]
        } else {
            &data[header.min(data.len())..]
        }
    };
    if ipv4.get_next_level_protocol() != IpNextHeaderProtocols::Tcp {
        trace!("ignoring non-TCP protocol {}", ipv4.get_next_level_protocol());
        return;
    }
    handle_l4_tcp(
        4,
        IpAddr::V4(ipv4.get_source()),
        IpAddr::V4(ipv4.get_destination()),
        payload,
        ts,
        stats,
        queue,
    );
}

fn handle_l3_ipv6(data: &[u8], ts: Duration, stats: &mut CaptureStats, queue: &IngestQueue) {
    let Some(ipv6) = Ipv6Packet::new(data) else {
        warn!("Could not build IPv6 packet from data");
        return;
    };
    // extension headers are not walked; a direct TCP next-header only
    if ipv6.get_next_header() != IpNextHeaderProtocols::Tcp {
        trace!("ignoring non-TCP next header {}", ipv6.get_next_header());
        return;
    }
    let src = IpAddr::V6(ipv6.get_source());
    let dst = IpAddr::V6(ipv6.get_destination());
    let plen = ipv6.get_payload_length() as usize;
    let payload = ipv6.payload();
    let payload = if plen <= payload.len() {
        &payload[..plen]
    } else {
        payload
    };
    handle_l4_tcp(6, src, dst, payload, ts, stats, queue);
}

fn handle_l4_tcp(
    ip_version: u8,
    src_ip: IpAddr,
    dst_ip: IpAddr,
    l3_data: &[u8],
    ts: Duration,
    stats: &mut CaptureStats,
    queue: &IngestQueue,
) {
    let Some(tcp) = TcpPacket::new(l3_data) else {
        warn!("Could not build TCP packet from data");
        return;
    };
    stats.tcp_segments += 1;
    let segment = RawSegment {
        ip_version,
        src_ip,
        dst_ip,
        src_port: tcp.get_source(),
        dst_port: tcp.get_destination(),
        seq: tcp.get_sequence(),
        ack: tcp.get_acknowledgement(),
        flags: u16::from(tcp.get_flags()),
        window: tcp.get_window(),
        options: decode_options(&tcp),
        header_len: tcp.get_data_offset() as usize * 4,
        payload_len: tcp.payload().len(),
        ts,
    };
    queue.send(segment);
}

fn decode_options(tcp: &TcpPacket) -> Vec<TcpOption> {
    let mut options = Vec::new();
    for opt in tcp.get_options_iter() {
        let payload = opt.payload();
        let decoded = match opt.get_number() {
            TcpOptionNumbers::EOL => TcpOption::EndOfOptions,
            TcpOptionNumbers::NOP => TcpOption::NoOperation,
            TcpOptionNumbers::MSS if payload.len() >= 2 => {
                TcpOption::Mss(u16::from_be_bytes([payload[0], payload[1]]))
            }
            TcpOptionNumbers::WSCALE if !payload.is_empty() => TcpOption::WindowScale(payload[0]),
            TcpOptionNumbers::SACK_PERMITTED => TcpOption::SackPermitted,
            TcpOptionNumbers::SACK => {
                let blocks = payload
                    .chunks_exact(8)
                    .map(|c| {
                        (
                            u32::from_be_bytes([c[0], c[1], c[2], c[3]]),
                            u32::from_be_bytes([c[4], c[5], c[6], c[7]]),
                        )
                    })
                    .collect();
                TcpOption::Sack(blocks)
            }
            TcpOptionNumbers::TIMESTAMPS if payload.len() >= 8 => TcpOption::Timestamp(
                u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
                u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]),
            ),
            other => TcpOption::Other(other.0),
        };
        options.push(decoded);
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use libtcp_insight::TcpStatus;
    use std::sync::Arc;

    /// Minimal single-packet legacy pcap: file header (LINKTYPE_RAW, so
    /// blocks carry bare IPv4) followed by one SYN from 10.0.0.1:4000 to
    /// 192.168.1.5:80.
    fn raw_ipv4_pcap() -> Vec<u8> {
        let mut tcp = vec![
            0x0f, 0xa0, // source port 4000
            0x00, 0x50, // destination port 80
            0x00, 0x00, 0x03, 0xe8, // seq 1000
            0x00, 0x00, 0x00, 0x00, // ack 0
            0x50, 0x02, // data offset 5, flags SYN
            0xfa, 0xf0, // window
            0x00, 0x00, // checksum (unchecked)
            0x00, 0x00, // urgent pointer
        ];
        let mut ip = vec![
            0x45, 0x00, // version 4, IHL 5
            0x00, 0x28, // total length 40
            0x00, 0x00, 0x00, 0x00, // id, flags
            0x40, 0x06, // ttl 64, protocol TCP
            0x00, 0x00, // checksum (unchecked)
            10, 0, 0, 1, // source
            192, 168, 1, 5, // destination
        ];
        ip.append(&mut tcp);

        let mut file = Vec::new();
        // global header: magic, version 2.4, zone/sigfigs, snaplen, linktype 101 (RAW)
        file.extend_from_slice(&0xa1b2_c3d4u32.to_le_bytes());
        file.extend_from_slice(&2u16.to_le_bytes());
        file.extend_from_slice(&4u16.to_le_bytes());
        file.extend_from_slice(&0u32.to_le_bytes());
        file.extend_from_slice(&0u32.to_le_bytes());
        file.extend_from_slice(&65535u32.to_le_bytes());
        file.extend_from_slice(&101u32.to_le_bytes());
        // record header: ts_sec, ts_usec, caplen, origlen
        file.extend_from_slice(&10u32.to_le_bytes());
        file.extend_from_slice(&500_000u32.to_le_bytes());
        file.extend_from_slice(&(ip.len() as u32).to_le_bytes());
        file.extend_from_slice(&(ip.len() as u32).to_le_bytes());
        file.extend_from_slice(&ip);
        file
    }

    #[test]
    fn legacy_raw_file_yields_one_syn() {
        let session = Arc::new(Session::new().with_rng_seed(11));
        let queue = IngestQueue::spawn(Arc::clone(&session));
        let file = raw_ipv4_pcap();
        let stats = process_reader(&mut file.as_slice(), &session, &queue).unwrap();
        queue.shutdown();

        assert_eq!(stats.packets, 1);
        assert_eq!(stats.tcp_segments, 1);
        let conns = session.connections();
        assert_eq!(conns.len(), 1);
        assert_eq!(conns[0].status(), TcpStatus::SynSent);
        let p = &session.global_store().snapshot()[0];
        assert_eq!(p.seq, 1000);
        assert_eq!(p.ts, Duration::new(10, 500_000));
        assert_eq!(p.source.port, 4000);
        assert_eq!(p.destination.port, 80);
    }

    #[test]
    fn truncated_file_is_an_error_not_a_panic() {
        let session = Arc::new(Session::new().with_rng_seed(12));
        let queue = IngestQueue::spawn(Arc::clone(&session));
        let file = raw_ipv4_pcap();
        // cut inside the packet record
        let mut cut = &file[..file.len() - 10];
        let res = process_reader(&mut cut, &session, &queue);
        queue.shutdown();
        // either a clean stop with a warning or an explicit error is fine,
        // but nothing must have been queued
        let _ = res;
        assert!(session.global_store().is_empty());
    }

    #[test]
    fn stopped_session_aborts_the_read() {
        let session = Arc::new(Session::new().with_rng_seed(13));
        session.stop_capture();
        let queue = IngestQueue::spawn(Arc::clone(&session));
        let file = raw_ipv4_pcap();
        let stats = process_reader(&mut file.as_slice(), &session, &queue).unwrap();
        queue.shutdown();
        assert_eq!(stats.tcp_segments, 0);
        assert!(session.global_store().is_empty());
    }
}
