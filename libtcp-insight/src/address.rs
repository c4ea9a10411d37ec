use fnv::FnvHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::sync::{Arc, OnceLock};

/// A transport endpoint: numeric address, optional resolved hostname, port.
///
/// The hostname cell is shared: every `Address` minted for the same numeric
/// address within a session points at the same `OnceLock`, so a completed
/// asynchronous resolution becomes visible to all of them at once.
#[derive(Clone, Debug)]
pub struct Address {
    pub ip: IpAddr,
    pub port: u16,
    hostname: Arc<OnceLock<String>>,
}

impl Address {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Address {
            ip,
            port,
            hostname: Arc::new(OnceLock::new()),
        }
    }

    pub(crate) fn with_hostname_cell(ip: IpAddr, port: u16, cell: Arc<OnceLock<String>>) -> Self {
        Address {
            ip,
            port,
            hostname: cell,
        }
    }

    /// Resolved hostname, if resolution has completed
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.get().map(|s| s.as_str())
    }

    /// Numeric form of the address
    pub fn numeric(&self) -> String {
        self.ip.to_string()
    }

    /// Resolved name when known, numeric form otherwise
    pub fn display_host(&self) -> String {
        match self.hostname.get() {
            Some(h) => h.clone(),
            None => self.ip.to_string(),
        }
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        if self.port != other.port {
            return false;
        }
        if self.ip == other.ip {
            return true;
        }
        // late resolution must not break identity: two copies of the same
        // endpoint stay equal once both carry the resolved name
        match (self.hostname.get(), other.hostname.get()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // hostname excluded: it is filled in asynchronously and must not
        // change the hash of an address already used as a map key
        self.ip.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.display_host(), self.port)
    }
}

/// Unordered endpoint pair identifying a connection.
///
/// Equality and hashing are symmetric: `(A,B)` and `(B,A)` denote the same
/// connection.
#[derive(Clone, Debug)]
pub struct ConnectionIdent {
    pub host: Address,
    pub host_two: Address,
}

impl ConnectionIdent {
    pub fn new(host: Address, host_two: Address) -> Self {
        ConnectionIdent { host, host_two }
    }

    pub fn contains(&self, addr: &Address) -> bool {
        self.host == *addr || self.host_two == *addr
    }
}

impl PartialEq for ConnectionIdent {
    fn eq(&self, other: &Self) -> bool {
        (self.host == other.host && self.host_two == other.host_two)
            || (self.host == other.host_two && self.host_two == other.host)
    }
}

impl Eq for ConnectionIdent {}

impl Hash for ConnectionIdent {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // XOR of per-side hashes keeps the pair hash symmetric
        let mut h1 = FnvHasher::default();
        self.host.hash(&mut h1);
        let mut h2 = FnvHasher::default();
        self.host_two.hash(&mut h2);
        state.write_u64(h1.finish() ^ h2.finish());
    }
}

impl fmt::Display for ConnectionIdent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} <-> {}", self.host, self.host_two)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn addr(s: &str, port: u16) -> Address {
        Address::new(s.parse().unwrap(), port)
    }

    fn hash_of<T: Hash>(t: &T) -> u64 {
        let mut h = DefaultHasher::new();
        t.hash(&mut h);
        h.finish()
    }

    #[test]
    fn address_equality_ignores_pending_resolution() {
        let a = addr("192.168.1.2", 80);
        let b = addr("192.168.1.2", 80);
        assert_eq!(a, b);
        let c = addr("192.168.1.2", 81);
        assert_ne!(a, c);
    }

    #[test]
    fn address_equality_by_hostname() {
        let a = Address::new("10.0.0.1".parse().unwrap(), 443);
        let b = Address::new("10.0.0.2".parse().unwrap(), 443);
        assert_ne!(a, b);
        a.hostname.set("example.net".to_string()).unwrap();
        b.hostname.set("example.net".to_string()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn ident_is_symmetric() {
        let a = addr("192.168.1.2", 1234);
        let b = addr("93.184.216.34", 80);
        let i1 = ConnectionIdent::new(a.clone(), b.clone());
        let i2 = ConnectionIdent::new(b, a);
        assert_eq!(i1, i2);
        assert_eq!(hash_of(&i1), hash_of(&i2));
    }
}
