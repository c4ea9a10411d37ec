use crate::address::Address;
use crate::error::Error;
use crate::packet::{IpVersion, PacketDraft, RawSegment};
use crate::resolver::{HostnameCache, ResolutionDriver};
use std::net::IpAddr;
use std::sync::Arc;

/// Convert a decoded header record into a canonical packet draft.
///
/// Direction and owning connection are left unassigned; the session binds
/// them during identity resolution. An IP version other than 4 or 6 is a
/// fatal-per-packet error: the caller drops the record and moves on.
///
/// When hostname resolution is enabled and the numeric address has not
/// been seen before, a background lookup is started; the draft is
/// returned immediately and carries the numeric form until the lookup
/// completes (no synchronization point is offered).
pub(crate) fn normalize(
    raw: RawSegment,
    cache: &HostnameCache,
    driver: &ResolutionDriver,
    resolve_hostnames: bool,
) -> Result<PacketDraft, Error> {
    let version = IpVersion::from_u8(raw.ip_version)
        .ok_or(Error::UnsupportedProtocolVersion(raw.ip_version))?;

    let source = make_address(raw.src_ip, raw.src_port, cache, driver, resolve_hostnames);
    let destination = make_address(raw.dst_ip, raw.dst_port, cache, driver, resolve_hostnames);

    Ok(PacketDraft {
        ts: raw.ts,
        version,
        source,
        destination,
        seq: i64::from(raw.seq),
        ack: i64::from(raw.ack),
        window: raw.window,
        payload_len: raw.payload_len,
        header_len: raw.header_len,
        flags: raw.flags,
        options: raw.options,
    })
}

fn make_address(
    ip: IpAddr,
    port: u16,
    cache: &HostnameCache,
    driver: &ResolutionDriver,
    resolve_hostnames: bool,
) -> Address {
    let (cell, fresh) = cache.cell(ip);
    if resolve_hostnames && fresh {
        driver.spawn(ip, Arc::clone(&cell));
    }
    Address::with_hostname_cell(ip, port, cell)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duration::Duration;
    use crate::resolver::NullResolver;
    use pnet_packet::tcp::TcpFlags;

    fn raw(version: u8) -> RawSegment {
        RawSegment {
            ip_version: version,
            src_ip: "192.168.1.5".parse().unwrap(),
            dst_ip: "93.184.216.34".parse().unwrap(),
            src_port: 54321,
            dst_port: 80,
            seq: u32::MAX,
            ack: 1,
            flags: TcpFlags::SYN as u16,
            window: 64240,
            options: Vec::new(),
            header_len: 20,
            payload_len: 0,
            ts: Duration::new(1, 0),
        }
    }

    #[test]
    fn rejects_unsupported_version() {
        let cache = HostnameCache::default();
        let driver = ResolutionDriver::new(std::sync::Arc::new(NullResolver));
        let err = normalize(raw(5), &cache, &driver, false).unwrap_err();
        assert!(matches!(err, Error::UnsupportedProtocolVersion(5)));
    }

    #[test]
    fn widens_sequence_numbers() {
        let cache = HostnameCache::default();
        let driver = ResolutionDriver::new(std::sync::Arc::new(NullResolver));
        let draft = normalize(raw(4), &cache, &driver, false).unwrap();
        assert_eq!(draft.seq, i64::from(u32::MAX));
        assert!(draft.seq > 0);
    }
}
