use fnv::FnvHashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;

/// Reverse-resolution backend. Implementations may block: the engine only
/// ever calls this from a fire-and-forget background thread.
pub trait HostnameResolver: Send + Sync + 'static {
    fn resolve(&self, ip: IpAddr) -> Option<String>;
}

/// Resolver that never answers; addresses keep their numeric form.
pub struct NullResolver;

impl HostnameResolver for NullResolver {
    fn resolve(&self, _ip: IpAddr) -> Option<String> {
        None
    }
}

/// Resolver backed by a plain function, handy for tests and embedders.
pub struct FnResolver<F>(pub F);

impl<F> HostnameResolver for FnResolver<F>
where
    F: Fn(IpAddr) -> Option<String> + Send + Sync + 'static,
{
    fn resolve(&self, ip: IpAddr) -> Option<String> {
        (self.0)(ip)
    }
}

pub(crate) type HostnameCell = Arc<OnceLock<String>>;

/// Numeric address to hostname-cell cache.
///
/// Every `Address` minted for the same numeric address in a session shares
/// one cell, so a completed resolution is observed by all of them, the
/// owning connections included.
#[derive(Default)]
pub(crate) struct HostnameCache {
    cells: Mutex<FnvHashMap<IpAddr, HostnameCell>>,
}

impl HostnameCache {
    /// Cell for `ip`, created on first use. The boolean is true when the
    /// entry did not exist before, i.e. a resolution may be wanted.
    pub(crate) fn cell(&self, ip: IpAddr) -> (HostnameCell, bool) {
        let mut cells = self.cells.lock().expect("hostname cache lock poisoned");
        if let Some(cell) = cells.get(&ip) {
            return (Arc::clone(cell), false);
        }
        let cell: HostnameCell = Arc::new(OnceLock::new());
        cells.insert(ip, Arc::clone(&cell));
        (cell, true)
    }

    /// Resolved name for `ip`, if resolution has completed
    pub(crate) fn lookup(&self, ip: IpAddr) -> Option<String> {
        let cells = self.cells.lock().expect("hostname cache lock poisoned");
        cells.get(&ip).and_then(|cell| cell.get().cloned())
    }

    pub(crate) fn clear(&self) {
        self.cells.lock().expect("hostname cache lock poisoned").clear();
    }
}

/// Spawns background resolutions and tracks how many are still running.
///
/// No cancellation and no ordering guarantee relative to packet
/// processing; `pending()` lets a caller poll for a settled state.
pub(crate) struct ResolutionDriver {
    resolver: Arc<dyn HostnameResolver>,
    in_flight: Arc<AtomicUsize>,
}

impl ResolutionDriver {
    pub(crate) fn new(resolver: Arc<dyn HostnameResolver>) -> Self {
        ResolutionDriver {
            resolver,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn spawn(&self, ip: IpAddr, cell: HostnameCell) {
        let resolver = Arc::clone(&self.resolver);
        let in_flight = Arc::clone(&self.in_flight);
        in_flight.fetch_add(1, Ordering::SeqCst);
        thread::spawn(move || {
            match resolver.resolve(ip) {
                Some(name) => {
                    trace!("resolved {ip} as {name}");
                    let _ = cell.set(name);
                }
                None => debug!("hostname resolution failed for {ip}"),
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cache_shares_cells_per_ip() {
        let cache = HostnameCache::default();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let (a, fresh_a) = cache.cell(ip);
        let (b, fresh_b) = cache.cell(ip);
        assert!(fresh_a);
        assert!(!fresh_b);
        a.set("example.org".to_string()).unwrap();
        assert_eq!(b.get().map(String::as_str), Some("example.org"));
        assert_eq!(cache.lookup(ip).as_deref(), Some("example.org"));
    }

    #[test]
    fn driver_settles_after_resolution() {
        let driver = ResolutionDriver::new(Arc::new(FnResolver(|_ip| {
            Some("resolved.example".to_string())
        })));
        let cache = HostnameCache::default();
        let ip: IpAddr = "10.0.0.2".parse().unwrap();
        let (cell, _) = cache.cell(ip);
        driver.spawn(ip, Arc::clone(&cell));
        // eventual consistency: poll until the background thread is done
        for _ in 0..100 {
            if driver.pending() == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(driver.pending(), 0);
        assert_eq!(cell.get().map(String::as_str), Some("resolved.example"));
    }
}
