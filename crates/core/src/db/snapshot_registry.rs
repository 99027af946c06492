//! Snapshot lifecycle: TTL tracking, guard-based release, periodic sweep.
//!
//! Every snapshot is wrapped in a [`SnapshotGuard`]; dropping the guard —
//! on normal return, panic, or owner teardown — releases the registration
//! promptly. The sweeper is the backstop for guards that are kept alive too
//! long: it warns at 80 % of the TTL and force-releases at 100 %.

use crate::kv::{KvSnapshot, KvStore};
use crate::metrics::METRICS;
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use triad_model::Result;

struct Entry {
    owner: String,
    created_at: Instant,
    ttl: Duration,
    warned: bool,
    // Kept so a force-release drops the engine snapshot as soon as no
    // guard still reads from it.
    _snapshot: Arc<dyn KvSnapshot>,
}

#[derive(Default)]
struct RegistryState {
    entries: FxHashMap<u64, Entry>,
    next_id: u64,
}

pub struct SnapshotRegistry {
    state: Arc<Mutex<RegistryState>>,
    shutdown: Arc<(Mutex<bool>, Condvar)>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    label: String,
}

impl SnapshotRegistry {
    pub fn new(sweep_interval: Duration, label: String) -> Arc<Self> {
        let registry = Arc::new(Self {
            state: Arc::new(Mutex::new(RegistryState::default())),
            shutdown: Arc::new((Mutex::new(false), Condvar::new())),
            sweeper: Mutex::new(None),
            label,
        });

        let weak: Weak<SnapshotRegistry> = Arc::downgrade(&registry);
        let shutdown = registry.shutdown.clone();
        let handle = std::thread::Builder::new()
            .name("triad-snapshot-sweeper".into())
            .spawn(move || loop {
                {
                    let (lock, condvar) = &*shutdown;
                    let mut stop = lock.lock();
                    if !*stop {
                        condvar.wait_for(&mut stop, sweep_interval);
                    }
                    if *stop {
                        return;
                    }
                }
                match weak.upgrade() {
                    Some(registry) => registry.sweep_once(),
                    None => return,
                }
            })
            .expect("spawn snapshot sweeper");
        *registry.sweeper.lock() = Some(handle);
        registry
    }

    /// Take a KV snapshot and register it. The returned guard releases on
    /// drop; the TTL is the backstop when it never drops.
    pub fn create(
        &self,
        kv: &dyn KvStore,
        owner: impl Into<String>,
        ttl: Duration,
    ) -> Result<SnapshotGuard> {
        let snapshot: Arc<dyn KvSnapshot> = Arc::from(kv.snapshot()?);
        let owner = owner.into();
        let id = {
            let mut state = self.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.entries.insert(
                id,
                Entry {
                    owner: owner.clone(),
                    created_at: Instant::now(),
                    ttl,
                    warned: false,
                    _snapshot: snapshot.clone(),
                },
            );
            id
        };
        METRICS
            .snapshots_created
            .with_label_values(&[&self.label])
            .inc();
        METRICS
            .open_snapshots
            .with_label_values(&[&self.label])
            .inc();
        log::debug!("snapshot {id} created for {owner} (ttl {ttl:?})");
        Ok(SnapshotGuard {
            id,
            snapshot,
            state: Arc::downgrade(&self.state),
            label: self.label.clone(),
        })
    }

    /// Run `f` with a snapshot, releasing it on the way out no matter how
    /// `f` returns.
    pub fn with_snapshot<R>(
        &self,
        kv: &dyn KvStore,
        owner: impl Into<String>,
        ttl: Duration,
        f: impl FnOnce(&SnapshotGuard) -> R,
    ) -> Result<R> {
        let guard = self.create(kv, owner, ttl)?;
        Ok(f(&guard))
    }

    pub fn active(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// One sweep pass: warn entries past 80 % of their TTL, force-release
    /// entries past 100 %.
    pub fn sweep_once(&self) {
        let mut expired = Vec::new();
        {
            let mut state = self.state.lock();
            for (id, entry) in state.entries.iter_mut() {
                let elapsed = entry.created_at.elapsed();
                if elapsed >= entry.ttl {
                    expired.push(*id);
                    log::warn!(
                        "force-releasing snapshot {id} owned by {} after {elapsed:?}",
                        entry.owner
                    );
                } else if !entry.warned && elapsed >= entry.ttl.mul_f64(0.8) {
                    entry.warned = true;
                    log::warn!(
                        "snapshot {id} owned by {} is at {elapsed:?} of its {:?} ttl",
                        entry.owner,
                        entry.ttl
                    );
                }
            }
            for id in &expired {
                state.entries.remove(id);
            }
        }
        for _ in &expired {
            METRICS
                .snapshots_force_released
                .with_label_values(&[&self.label])
                .inc();
            METRICS
                .open_snapshots
                .with_label_values(&[&self.label])
                .dec();
        }
    }

    /// Stop the sweeper and drop every remaining registration.
    pub fn close(&self) {
        {
            let (lock, condvar) = &*self.shutdown;
            *lock.lock() = true;
            condvar.notify_all();
        }
        if let Some(handle) = self.sweeper.lock().take() {
            let _ = handle.join();
        }
        let mut state = self.state.lock();
        let leaked = state.entries.len();
        if leaked > 0 {
            log::warn!("{leaked} snapshots still registered at close");
            METRICS
                .open_snapshots
                .with_label_values(&[&self.label])
                .sub(leaked as i64);
        }
        state.entries.clear();
    }
}

/// RAII handle to a registered snapshot. Reads go through
/// [`SnapshotGuard::view`]; dropping releases the registration (idempotent
/// against a concurrent force-release).
pub struct SnapshotGuard {
    id: u64,
    snapshot: Arc<dyn KvSnapshot>,
    state: Weak<Mutex<RegistryState>>,
    label: String,
}

impl SnapshotGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn view(&self) -> Arc<dyn KvSnapshot> {
        self.snapshot.clone()
    }
}

impl Drop for SnapshotGuard {
    fn drop(&mut self) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        // Double release (e.g. after a sweep) is a no-op.
        if state.lock().entries.remove(&self.id).is_some() {
            METRICS
                .open_snapshots
                .with_label_values(&[&self.label])
                .dec();
            log::debug!("snapshot {} released", self.id);
        }
    }
}
