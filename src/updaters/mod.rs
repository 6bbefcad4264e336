//! Per-stage orchestration: extract -> fan out fetch+parse -> save.
//!
//! Stages 3..5 share the same pool shape: a queue of race items drained by
//! a bounded set of workers. Per-item failures are isolated; the stage
//! only reports `ok = false`, it never aborts early except on
//! cancellation.

pub mod step1;
pub mod step2;
pub mod step3;
pub mod step4;
pub mod step5;

pub use step1::Step1Updater;
pub use step2::Step2Updater;
pub use step3::Step3Updater;
pub use step4::Step4Updater;
pub use step5::Step5Updater;

use crate::cancel::CancelFlag;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// What happened to one queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Saved; carries the number of rows written.
    Saved(u64),
    /// Upstream has not published the item yet; the ledger stays pending.
    Pending,
    /// The item failed; the stage continues.
    Error,
}

/// Aggregate pool result.
#[derive(Debug, Default, Clone, Copy)]
pub struct PoolStats {
    pub processed: u64,
    pub saved: u64,
    pub pending: u64,
    pub errors: u64,
    pub rows: u64,
    pub cancelled: bool,
}

impl PoolStats {
    fn absorb(&mut self, outcome: ItemOutcome) {
        self.processed += 1;
        match outcome {
            ItemOutcome::Saved(rows) => {
                self.saved += 1;
                self.rows += rows;
            }
            ItemOutcome::Pending => self.pending += 1,
            ItemOutcome::Error => self.errors += 1,
        }
    }

    pub fn clean(&self) -> bool {
        self.errors == 0 && !self.cancelled
    }
}

/// Drain `items` with `workers` concurrent tasks. The cancellation flag is
/// checked between items; a cancelled pool returns the partial stats with
/// `cancelled` set.
pub async fn run_pool<T, F, Fut>(
    items: Vec<T>,
    workers: usize,
    cancel: CancelFlag,
    handler: F,
) -> PoolStats
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = ItemOutcome> + Send + 'static,
{
    let stats = Arc::new(Mutex::new(PoolStats::default()));
    let (tx, rx) = mpsc::channel(items.len().max(1));
    for item in items {
        // Channel sized to the queue; send cannot fail here.
        let _ = tx.send(item).await;
    }
    drop(tx);

    let shared_rx = Arc::new(tokio::sync::Mutex::new(rx));
    let workers = workers.max(1);
    let mut handles = Vec::with_capacity(workers);

    for _ in 0..workers {
        let rx = shared_rx.clone();
        let handler = handler.clone();
        let cancel = cancel.clone();
        let stats = stats.clone();
        handles.push(tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    stats.lock().cancelled = true;
                    break;
                }
                let item = { rx.lock().await.recv().await };
                let Some(item) = item else {
                    break;
                };
                let outcome = handler(item).await;
                stats.lock().absorb(outcome);
            }
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "Stage worker panicked");
            stats.lock().errors += 1;
        }
    }

    let final_stats = *stats.lock();
    final_stats
}
