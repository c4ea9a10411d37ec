use crate::address::{Address, ConnectionIdent};
use crate::connection::Connection;
use crate::error::Error;
use crate::filter::{is_visible, FilterConfig};
use crate::normalizer::normalize;
use crate::packet::{ConnectionId, Direction, Packet, PacketDraft, RawSegment};
use crate::resolver::{HostnameCache, HostnameResolver, NullResolver, ResolutionDriver};
use crate::state::TcpStatus;
use crate::store::PacketStore;
use fnv::FnvHashMap;
use indexmap::IndexMap;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaChaRng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Capture-session context.
///
/// Owns the connection registry, the global packet store and the hostname
/// cache; replaces any notion of process-wide state. Create a fresh
/// session (or call [`Session::reset`]) whenever a new capture or file is
/// opened.
pub struct Session {
    registry: Mutex<Registry>,
    global: PacketStore,
    cache: HostnameCache,
    driver: ResolutionDriver,
    locals: Mutex<HashSet<String>>,
    resolve_hostnames: bool,
    capturing: AtomicBool,
}

/// Connections keyed by the chosen remote address. `order` preserves
/// creation order for deterministic presentation.
struct Registry {
    by_remote: FnvHashMap<Address, Arc<Connection>>,
    by_id: FnvHashMap<ConnectionId, Arc<Connection>>,
    order: Vec<Arc<Connection>>,
    trng: ChaChaRng,
}

impl Registry {
    /// Atomic locate-or-create: callers hold the registry lock, so two
    /// packets racing on the same new remote address cannot create two
    /// distinct connections.
    fn locate_or_create(&mut self, remote: &Address, draft: &PacketDraft) -> Arc<Connection> {
        if let Some(conn) = self.by_remote.get(remote) {
            return Arc::clone(conn);
        }
        let id = self.trng.next_u64();
        let ident = ConnectionIdent::new(draft.source.clone(), draft.destination.clone());
        debug!("new connection {:x}: {}", id, ident);
        let conn = Arc::new(Connection::new(id, ident));
        self.by_remote.insert(remote.clone(), Arc::clone(&conn));
        self.by_id.insert(id, Arc::clone(&conn));
        self.order.push(Arc::clone(&conn));
        conn
    }

    fn clear(&mut self) {
        self.by_remote.clear();
        self.by_id.clear();
        self.order.clear();
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}

impl Session {
    /// Session without hostname resolution
    pub fn new() -> Self {
        Session::build(false, Arc::new(NullResolver))
    }

    /// Session resolving hostnames through `resolver`, asynchronously
    pub fn with_resolver(resolver: Arc<dyn HostnameResolver>) -> Self {
        Session::build(true, resolver)
    }

    fn build(resolve_hostnames: bool, resolver: Arc<dyn HostnameResolver>) -> Self {
        Session {
            registry: Mutex::new(Registry {
                by_remote: FnvHashMap::default(),
                by_id: FnvHashMap::default(),
                order: Vec::new(),
                trng: ChaChaRng::from_rng(&mut rand::rng()),
            }),
            global: PacketStore::new(),
            cache: HostnameCache::default(),
            driver: ResolutionDriver::new(resolver),
            locals: Mutex::new(HashSet::new()),
            resolve_hostnames,
            capturing: AtomicBool::new(true),
        }
    }

    /// Use the provided seed for connection-ID generation.
    ///
    /// This option is intended for use in testing.
    pub fn with_rng_seed(self, seed: u64) -> Self {
        {
            let mut registry = self.registry.lock().expect("registry lock poisoned");
            registry.trng = ChaChaRng::seed_from_u64(seed);
        }
        self
    }

    /// Install the addresses bound to the capturing interface (live mode).
    /// When empty, direction falls back to the private-range heuristic
    /// used for offline files.
    pub fn set_local_addresses<I>(&self, addrs: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut locals = self.locals.lock().expect("locals lock poisoned");
        locals.clear();
        locals.extend(addrs);
    }

    /// Cooperative capture flag: a running capture loop polls this and
    /// stops within one packet once cleared.
    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    pub fn start_capture(&self) {
        self.capturing.store(true, Ordering::SeqCst);
    }

    pub fn stop_capture(&self) {
        self.capturing.store(false, Ordering::SeqCst);
    }

    /// Drop all connections, packets and cached resolutions, keeping the
    /// local-address set. Called when a new capture or file is opened.
    pub fn reset(&self) {
        self.registry.lock().expect("registry lock poisoned").clear();
        self.global.clear();
        self.cache.clear();
        self.start_capture();
    }

    /// Number of hostname resolutions still in flight
    pub fn pending_resolutions(&self) -> usize {
        self.driver.pending()
    }

    /// Ingest one decoded segment: normalize, resolve identity and
    /// direction, store, and advance the owning connection's status.
    ///
    /// The registry lock is held from locate-or-create through the status
    /// transition, serializing transitions per connection.
    pub fn handle_segment(&self, raw: RawSegment) -> Result<Arc<Packet>, Error> {
        let draft = normalize(raw, &self.cache, &self.driver, self.resolve_hostnames)?;

        let mut registry = self.registry.lock().expect("registry lock poisoned");
        let (direction, remote) = self.resolve_direction(&draft.source, &draft.destination);
        let remote = match remote {
            RemoteSide::Source => draft.source.clone(),
            RemoteSide::Destination => draft.destination.clone(),
        };
        let conn = registry.locate_or_create(&remote, &draft);
        let packet = Arc::new(draft.bind(direction, conn.id()));
        conn.apply(&packet);
        self.global.insert(Arc::clone(&packet));
        drop(registry);

        Ok(packet)
    }

    /// Decide capture direction and which endpoint keys the connection.
    ///
    /// A destination bound to the capture interface (or, offline, lying in
    /// a private range) marks the packet as outgoing with the source as
    /// remote key; everything else is incoming, keyed by destination.
    fn resolve_direction(&self, _source: &Address, destination: &Address) -> (Direction, RemoteSide) {
        let locals = self.locals.lock().expect("locals lock poisoned");
        let dst_local = if locals.is_empty() {
            is_private(&destination.numeric())
        } else {
            locals.contains(&destination.numeric())
        };
        if dst_local {
            (Direction::Outgoing, RemoteSide::Source)
        } else {
            (Direction::Incoming, RemoteSide::Destination)
        }
    }

    /// Global store holding every packet of the session
    pub fn global_store(&self) -> &PacketStore {
        &self.global
    }

    /// All connections, in creation order
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.registry
            .lock()
            .expect("registry lock poisoned")
            .order
            .clone()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.registry
            .lock()
            .expect("registry lock poisoned")
            .by_id
            .get(&id)
            .cloned()
    }

    /// Connection owning `packet`, if still registered
    pub fn connection_of(&self, packet: &Packet) -> Option<Arc<Connection>> {
        self.connection(packet.connection())
    }

    /// Number of stored packets matching the filter
    pub fn count_visible(&self, config: &FilterConfig) -> usize {
        self.global
            .snapshot()
            .iter()
            .filter(|p| is_visible(p, config))
            .count()
    }

    /// Connections grouped by protocol status, in creation order of first
    /// appearance
    pub fn status_summary(&self) -> IndexMap<TcpStatus, usize> {
        let mut summary = IndexMap::new();
        for conn in self.connections() {
            *summary.entry(conn.status()).or_insert(0) += 1;
        }
        summary
    }

    /// Click-to-select lookup over the global store
    pub fn find_packet_matching(
        &self,
        seq: i64,
        ack: i64,
        payload_len: usize,
        signature: &str,
    ) -> Option<Arc<Packet>> {
        self.global.find_matching(seq, ack, payload_len, signature)
    }
}

/// Offline-file heuristic: a "192"- or "172"-prefixed numeric address is
/// assumed to be on the capturing side.
fn is_private(numeric: &str) -> bool {
    numeric.starts_with("192") || numeric.starts_with("172")
}

enum RemoteSide {
    Source,
    Destination,
}
