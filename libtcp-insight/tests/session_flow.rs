//! End-to-end exercise of the public API: segments in, connections,
//! reports and lookups out.

use libtcp_insight::*;
use pnet_packet::tcp::TcpFlags;
use std::net::IpAddr;
use std::sync::Arc;

const LOCAL: (&str, u16) = ("192.168.1.5", 54321);
const REMOTE: (&str, u16) = ("93.184.216.34", 80);

fn segment(
    ts_ms: u64,
    src: (&str, u16),
    dst: (&str, u16),
    flags: u16,
    seq: u32,
    ack: u32,
    payload_len: usize,
    options: Vec<TcpOption>,
) -> RawSegment {
    RawSegment {
        ip_version: 4,
        src_ip: src.0.parse::<IpAddr>().unwrap(),
        dst_ip: dst.0.parse::<IpAddr>().unwrap(),
        src_port: src.1,
        dst_port: dst.1,
        seq,
        ack,
        flags,
        window: 64240,
        options,
        header_len: 20,
        payload_len,
        ts: Duration::from_millis(ts_ms),
    }
}

/// Handshake, a data exchange, then a teardown initiated by the local
/// side (destination-local packets are outgoing).
fn feed_full_exchange(session: &Session) {
    let syn = TcpFlags::SYN as u16;
    let ack = TcpFlags::ACK as u16;
    let psh = TcpFlags::PSH as u16;
    let fin = TcpFlags::FIN as u16;

    // remote -> local is the outgoing direction
    session
        .handle_segment(segment(
            0,
            REMOTE,
            LOCAL,
            syn,
            1000,
            0,
            0,
            vec![TcpOption::Mss(1460), TcpOption::WindowScale(7)],
        ))
        .unwrap();
    session
        .handle_segment(segment(
            10,
            LOCAL,
            REMOTE,
            syn | ack,
            5000,
            1001,
            0,
            vec![TcpOption::Mss(1400)],
        ))
        .unwrap();
    session
        .handle_segment(segment(20, REMOTE, LOCAL, ack, 1001, 5001, 0, vec![]))
        .unwrap();
    // data both ways
    session
        .handle_segment(segment(30, REMOTE, LOCAL, psh | ack, 1001, 5001, 120, vec![]))
        .unwrap();
    session
        .handle_segment(segment(40, LOCAL, REMOTE, psh | ack, 5001, 1121, 300, vec![]))
        .unwrap();
    // local side closes first
    session
        .handle_segment(segment(50, REMOTE, LOCAL, fin | ack, 1121, 5301, 0, vec![]))
        .unwrap();
    session
        .handle_segment(segment(60, LOCAL, REMOTE, fin | ack, 5301, 1122, 0, vec![]))
        .unwrap();
    session
        .handle_segment(segment(70, REMOTE, LOCAL, ack, 1122, 5302, 0, vec![]))
        .unwrap();
}

#[test]
fn full_exchange_builds_one_connection() {
    let session = Session::new().with_rng_seed(42);
    feed_full_exchange(&session);

    let conns = session.connections();
    assert_eq!(conns.len(), 1);
    let conn = &conns[0];
    assert_eq!(conn.status(), TcpStatus::TimeWait);
    assert_eq!(conn.store().len(), 8);
    assert_eq!(session.global_store().len(), 8);

    // per-direction accounting
    assert_eq!(conn.store().bytes_in_direction(Direction::Outgoing), 120);
    assert_eq!(conn.store().bytes_in_direction(Direction::Incoming), 300);
    assert_eq!(conn.attrs(Direction::Outgoing).mss, Some(1460));
    assert_eq!(conn.attrs(Direction::Outgoing).window_scale, Some(7));
    assert_eq!(conn.attrs(Direction::Incoming).mss, Some(1400));
}

#[test]
fn report_contains_expected_sections() {
    let session = Session::new().with_rng_seed(43);
    feed_full_exchange(&session);
    let conns = session.connections();
    let report = connection_report(&conns[0], &DisplayConfig::default(), Sensitivity::Balanced);
    assert!(report.contains("status: TIME_WAIT"));
    assert!(report.contains("bytes: 120 sent / 300 received"));
    assert!(report.contains("TCP options:"));
    assert!(report.contains("SYN: 1 sent / 1 received"));
    assert!(report.contains("FIN: 1 sent / 1 received"));

    let summary = session.status_summary();
    assert_eq!(summary.get(&TcpStatus::TimeWait), Some(&1));
    assert_eq!(format_status_summary(&summary), "TIME_WAIT: 1\n");
}

#[test]
fn filters_apply_to_the_global_store() {
    let session = Session::new().with_rng_seed(44);
    feed_full_exchange(&session);

    assert_eq!(session.count_visible(&FilterConfig::default()), 8);

    let config = FilterConfig {
        port_filter: Some("80-90".to_string()),
        ..FilterConfig::default()
    };
    // every packet touches port 80
    assert_eq!(session.count_visible(&config), 8);

    let config = FilterConfig {
        port_filter: Some("9000-9100".to_string()),
        ..FilterConfig::default()
    };
    assert_eq!(session.count_visible(&config), 0);

    let config = FilterConfig {
        show_ipv4: false,
        ..FilterConfig::default()
    };
    assert_eq!(session.count_visible(&config), 0);

    let config = FilterConfig {
        selected: Some(session.connections().remove(0)),
        ..FilterConfig::default()
    };
    assert_eq!(session.count_visible(&config), 8);
}

#[test]
fn click_to_select_lookup() {
    let session = Session::new().with_rng_seed(45);
    feed_full_exchange(&session);
    let packet = session.find_packet_matching(1001, 5001, 120, "ACK PSH").unwrap();
    assert_eq!(packet.payload_len, 120);
    let conn = session.connection_of(&packet).unwrap();
    assert_eq!(conn.id(), packet.connection());
}

#[test]
fn ingest_queue_end_to_end() {
    let session = Arc::new(Session::new().with_rng_seed(46));
    let queue = IngestQueue::spawn(Arc::clone(&session));
    queue.send(segment(0, REMOTE, LOCAL, TcpFlags::SYN as u16, 1000, 0, 0, vec![]));
    queue.send(segment(
        10,
        LOCAL,
        REMOTE,
        TcpFlags::SYN as u16 | TcpFlags::ACK as u16,
        5000,
        1001,
        0,
        vec![],
    ));
    queue.send(segment(20, REMOTE, LOCAL, TcpFlags::ACK as u16, 1001, 5001, 0, vec![]));
    queue.shutdown();
    let conns = session.connections();
    assert_eq!(conns.len(), 1);
    assert_eq!(conns[0].status(), TcpStatus::Established);
}

#[test]
fn hostname_resolution_is_eventually_consistent() {
    let resolver = Arc::new(FnResolver(|ip: IpAddr| {
        if ip.to_string() == REMOTE.0 {
            Some("server.example".to_string())
        } else {
            None
        }
    }));
    let session = Session::with_resolver(resolver).with_rng_seed(47);
    feed_full_exchange(&session);

    // poll until the background lookups settle
    for _ in 0..200 {
        if session.pending_resolutions() == 0 {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    assert_eq!(session.pending_resolutions(), 0);

    // the name is visible on already-stored packets and filterable
    let config = FilterConfig {
        host_filter: Some("server.example".to_string()),
        ..FilterConfig::default()
    };
    assert_eq!(session.count_visible(&config), 8);
}
