use crate::address::Address;
use crate::connection::Connection;
use crate::error::Error;
use crate::packet::{IpVersion, Packet};
use std::sync::Arc;

/// User-specified visibility criteria. All configured criteria must hold
/// for a packet to be shown.
#[derive(Clone)]
pub struct FilterConfig {
    pub show_ipv4: bool,
    pub show_ipv6: bool,
    /// When set, only packets touching this connection's host are visible
    pub selected: Option<Arc<Connection>>,
    /// Case-sensitive substring over numeric or resolved endpoint names
    pub host_filter: Option<String>,
    /// Single port "N" or inclusive range "N-M"
    pub port_filter: Option<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            show_ipv4: true,
            show_ipv6: true,
            selected: None,
            host_filter: None,
            port_filter: None,
        }
    }
}

/// Inclusive port range parsed from "N" or "N-M".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortRange {
    lo: u16,
    hi: u16,
}

impl PortRange {
    pub fn parse(input: &str) -> Result<PortRange, Error> {
        let bad = || Error::InvalidPortFilter(input.to_string());
        let s = input.trim();
        let (lo, hi) = match s.split_once('-') {
            Some((a, b)) => {
                let lo = a.trim().parse::<u16>().map_err(|_| bad())?;
                let hi = b.trim().parse::<u16>().map_err(|_| bad())?;
                (lo, hi)
            }
            None => {
                let p = s.parse::<u16>().map_err(|_| bad())?;
                (p, p)
            }
        };
        if lo > hi {
            return Err(bad());
        }
        Ok(PortRange { lo, hi })
    }

    #[inline]
    pub fn contains(self, port: u16) -> bool {
        self.lo <= port && port <= self.hi
    }
}

/// Pure visibility predicate.
///
/// A malformed port filter never aborts an evaluation: it is logged and
/// the port criterion is skipped (non-restrictive) for that call.
pub fn is_visible(packet: &Packet, config: &FilterConfig) -> bool {
    match packet.version {
        IpVersion::V4 if !config.show_ipv4 => return false,
        IpVersion::V6 if !config.show_ipv6 => return false,
        _ => (),
    }

    if let Some(conn) = &config.selected {
        let host = conn.host();
        if packet.source != *host && packet.destination != *host {
            return false;
        }
    }

    if let Some(needle) = &config.host_filter {
        if !host_matches(&packet.source, needle) && !host_matches(&packet.destination, needle) {
            return false;
        }
    }

    if let Some(spec) = &config.port_filter {
        match PortRange::parse(spec) {
            Ok(range) => {
                if !range.contains(packet.source.port) && !range.contains(packet.destination.port) {
                    return false;
                }
            }
            Err(e) => warn!("ignoring port filter: {e}"),
        }
    }

    true
}

fn host_matches(addr: &Address, needle: &str) -> bool {
    addr.numeric().contains(needle) || addr.hostname().is_some_and(|h| h.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duration::Duration;
    use crate::packet::{Direction, PacketDraft};
    use pnet_packet::tcp::TcpFlags;

    fn packet(src: (&str, u16), dst: (&str, u16), version: IpVersion) -> Packet {
        let draft = PacketDraft {
            ts: Duration::default(),
            version,
            source: Address::new(src.0.parse().unwrap(), src.1),
            destination: Address::new(dst.0.parse().unwrap(), dst.1),
            seq: 1,
            ack: 0,
            window: 64240,
            payload_len: 0,
            header_len: 20,
            flags: TcpFlags::SYN as u16,
            options: Vec::new(),
        };
        draft.bind(Direction::Incoming, 1)
    }

    #[test]
    fn port_range_filtering() {
        let config = FilterConfig {
            port_filter: Some("80-90".to_string()),
            ..FilterConfig::default()
        };
        let hit = packet(("10.0.0.1", 1234), ("10.0.0.2", 85), IpVersion::V4);
        assert!(is_visible(&hit, &config));
        let miss = packet(("10.0.0.1", 95), ("10.0.0.2", 95), IpVersion::V4);
        assert!(!is_visible(&miss, &config));
    }

    #[test]
    fn single_port_filter() {
        let config = FilterConfig {
            port_filter: Some("443".to_string()),
            ..FilterConfig::default()
        };
        assert!(is_visible(
            &packet(("10.0.0.1", 443), ("10.0.0.2", 50000), IpVersion::V4),
            &config
        ));
        assert!(!is_visible(
            &packet(("10.0.0.1", 80), ("10.0.0.2", 50000), IpVersion::V4),
            &config
        ));
    }

    #[test]
    fn malformed_port_filter_is_non_restrictive() {
        let config = FilterConfig {
            port_filter: Some("eighty-ninety".to_string()),
            ..FilterConfig::default()
        };
        let p = packet(("10.0.0.1", 12345), ("10.0.0.2", 23456), IpVersion::V4);
        assert!(is_visible(&p, &config));
        assert!(PortRange::parse("eighty-ninety").is_err());
        assert!(PortRange::parse("90-80").is_err());
    }

    #[test]
    fn version_toggles() {
        let v6 = packet(("::1", 80), ("::2", 81), IpVersion::V6);
        let config = FilterConfig {
            show_ipv6: false,
            ..FilterConfig::default()
        };
        assert!(!is_visible(&v6, &config));
        let config = FilterConfig::default();
        assert!(is_visible(&v6, &config));
    }

    #[test]
    fn host_substring_is_case_sensitive() {
        let p = packet(("192.168.1.10", 80), ("10.0.0.2", 81), IpVersion::V4);
        let config = FilterConfig {
            host_filter: Some("192.168".to_string()),
            ..FilterConfig::default()
        };
        assert!(is_visible(&p, &config));
        let config = FilterConfig {
            host_filter: Some("172.16".to_string()),
            ..FilterConfig::default()
        };
        assert!(!is_visible(&p, &config));
    }
}
