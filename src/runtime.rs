//! Background execution: tick driving and rank reconciliation.
//!
//! Commands, the tick driver, and the reconcile worker all serialize
//! through one [`SharedStore`] mutex, the single-writer boundary the
//! store's design assumes. The reconcile worker runs on its own named
//! thread at a much coarser period than the tick and is shut down
//! deterministically through a channel when dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::gateway::{PermissionSync, PointsSource};
use crate::principal::PrincipalId;
use crate::rank::Rank;
use crate::store::WarStore;

/// Shared handle to the store: the single mutual-exclusion boundary for
/// commands, ticks, and reconciliation.
pub type SharedStore = Arc<Mutex<WarStore>>;

/// Per-tick re-evaluation of every live conflict.
///
/// The host scheduler calls [`TickDriver::tick`] once per tick; the
/// driver is tick-rate-agnostic because all timing decisions are plain
/// elapsed-time comparisons inside the store.
pub struct TickDriver {
    store: SharedStore,
}

impl TickDriver {
    /// Creates a driver over the shared store.
    #[must_use]
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Runs one tick pass. A poisoned store lock is logged and the pass
    /// skipped; the next tick tries again.
    pub fn tick(&self) {
        match self.store.lock() {
            Ok(mut store) => store.tick(),
            Err(_) => warn!("store lock poisoned; skipping tick pass"),
        }
    }
}

/// Reconcile worker configuration.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileConfig {
    /// Period between reconcile passes. Clamped to at least one second.
    pub interval: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
        }
    }
}

/// One reconcile pass: derive every principal's rank from points and
/// re-issue downstream sync calls where the derivation changed.
///
/// Sync side effects are idempotent and order-independent; when either
/// call fails the cached derivation is forgotten so the next pass
/// retries the whole resync for that principal.
fn reconcile_pass(
    store: &SharedStore,
    points: &dyn PointsSource,
    sync: &dyn PermissionSync,
    last_ranks: &mut HashMap<PrincipalId, Rank>,
) {
    for principal in points.principals() {
        let rank = Rank::from_points(points.points_of(principal));
        let previous = last_ranks.insert(principal, rank);
        if previous == Some(rank) {
            continue;
        }
        info!(%principal, %rank, "derived rank changed, resyncing");

        let group_ok = sync.set_rank_group(principal, rank);
        let allowance_ok = sync.set_claim_allowance(principal, rank.claim_allowance());
        if !(group_ok && allowance_ok) {
            warn!(%principal, "permission resync incomplete; retrying next pass");
            last_ranks.remove(&principal);
        }

        if previous.is_some_and(Rank::is_leader_equivalent) && !rank.is_leader_equivalent() {
            // Conflicts are never auto-terminated by a demotion, but a
            // demoted party is worth surfacing to the operator.
            if let Ok(store) = store.lock() {
                if store.is_involved(principal) {
                    warn!(%principal, "conflict party lost leader rank; conflicts stay live");
                }
            }
        }
    }
}

/// Coarse-period background thread re-deriving achievement ranks.
///
/// Dropping the worker signals the thread and joins it.
pub struct ReconcileWorker {
    shutdown: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl ReconcileWorker {
    /// Spawns the worker thread.
    ///
    /// # Panics
    /// Panics if the OS refuses to spawn a thread.
    #[must_use]
    pub fn start(
        store: SharedStore,
        points: Arc<dyn PointsSource>,
        sync: Arc<dyn PermissionSync>,
        config: ReconcileConfig,
    ) -> Self {
        let interval = config.interval.max(Duration::from_secs(1));
        let (shutdown, rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("warpact-reconcile".to_string())
            .spawn(move || {
                debug!(interval_secs = interval.as_secs(), "reconcile worker started");
                let mut last_ranks: HashMap<PrincipalId, Rank> = HashMap::new();
                loop {
                    match rx.recv_timeout(interval) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {
                            reconcile_pass(&store, points.as_ref(), sync.as_ref(), &mut last_ranks);
                        }
                    }
                }
                debug!("reconcile worker stopped");
            })
            .expect("failed to spawn warpact reconcile worker");

        Self {
            shutdown,
            handle: Some(handle),
        }
    }
}

impl Drop for ReconcileWorker {
    fn drop(&mut self) {
        // Wake the thread out of its sleep and join it.
        let _ = self.shutdown.try_send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
