//! Background eviction of expired attempt records.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Weak;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::debug;

use super::store::MemoryStore;

/// A running sweep task.
///
/// Owned by the store's sweeper slot. The task only holds a weak reference to
/// the store, and clears the slot itself once the store is empty.
#[derive(Debug)]
pub(crate) struct Sweeper {
    /// Generation of this task, used to detect a superseded task
    id: u64,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn a sweep task on `runtime` that ticks every `period`.
    ///
    /// Returns `None` when the runtime was built without a time driver. The
    /// ticker is created here rather than in the task so that this is seen
    /// once by the caller instead of as a panic in every spawned task.
    pub(crate) fn spawn(
        id: u64,
        store: Weak<MemoryStore>,
        period: Duration,
        runtime: &Handle,
    ) -> Option<Self> {
        let ticker = {
            let _entered = runtime.enter();
            panic::catch_unwind(AssertUnwindSafe(|| new_ticker(period))).ok()?
        };
        let handle = runtime.spawn(run(id, store, ticker));
        Some(Self { id, handle })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the task at its next await point.
    pub(crate) fn abort(self) {
        self.handle.abort();
    }
}

/// Panics if the current runtime has timers disabled.
fn new_ticker(period: Duration) -> Interval {
    // interval panics on a zero period
    let period = period.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

async fn run(id: u64, store: Weak<MemoryStore>, mut ticker: Interval) {
    loop {
        ticker.tick().await;

        let Some(store) = store.upgrade() else {
            debug!(sweeper = id, "Store dropped, sweeper exiting");
            return;
        };

        let evicted = store.sweep();
        if evicted > 0 {
            debug!(
                sweeper = id,
                evicted = evicted,
                remaining = store.len(),
                "Evicted expired attempt records"
            );
        }

        if store.release_sweeper(id) {
            debug!(sweeper = id, "Sweeper stopped");
            return;
        }
    }
}
