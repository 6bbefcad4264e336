//! Stage 3: per-race detail fan-out.
//!
//! The race-detail endpoint is the touchiest upstream surface, so the
//! pool defaults to a single worker; the item flow is
//! processing -> completed / pending (404) / error.

use super::{run_pool, ItemOutcome};
use crate::cancel::CancelFlag;
use crate::db::Store;
use crate::extractors::{Step3Extractor, WorkWindow};
use crate::models::{StageOutcome, StepStatus};
use crate::savers::Step3Saver;
use crate::scrapers::http::FetchError;
use crate::scrapers::winticket::WinticketClient;
use std::sync::Arc;
use tracing::{error, warn};

pub(crate) fn mark(store: &Store, race_id: &str, step: u8, status: StepStatus) {
    if let Err(e) = store.set_step_status(race_id, step, status) {
        // The ledger write failing is worth a log line, never an abort.
        warn!(race_id, step, status = %status, error = %e, "Ledger update failed");
    }
}

pub struct Step3Updater {
    client: Arc<WinticketClient>,
    store: Store,
    saver: Arc<Step3Saver>,
    extractor: Step3Extractor,
    workers: usize,
    cancel: CancelFlag,
}

impl Step3Updater {
    pub fn new(
        client: Arc<WinticketClient>,
        store: Store,
        workers: usize,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            client,
            saver: Arc::new(Step3Saver::new(store.clone())),
            extractor: Step3Extractor::new(store.clone()),
            store,
            workers,
            cancel,
        }
    }

    pub async fn update_window(&self, window: &WorkWindow) -> StageOutcome {
        let items = match self.extractor.extract(window) {
            Ok(items) => items,
            Err(e) => return StageOutcome::failed(format!("extraction failed: {e}"), 0),
        };
        if items.is_empty() {
            return StageOutcome::ok("no races to update", 0);
        }
        let total = items.len();

        let client = self.client.clone();
        let store = self.store.clone();
        let saver = self.saver.clone();

        let stats = run_pool(items, self.workers, self.cancel.clone(), move |item| {
            let client = client.clone();
            let store = store.clone();
            let saver = saver.clone();
            async move {
                mark(&store, &item.race_id, 3, StepStatus::Processing);

                match client
                    .race_detail(&item.cup_id, item.schedule_index, item.number)
                    .await
                {
                    Ok(detail) => match saver.save_race_detail(&item, &detail) {
                        Ok(counts) => {
                            ItemOutcome::Saved((counts.entries + counts.players) as u64)
                        }
                        Err(e) => {
                            error!(race_id = %item.race_id, error = %e, "Race detail save failed");
                            mark(&store, &item.race_id, 3, StepStatus::Error);
                            ItemOutcome::Error
                        }
                    },
                    Err(FetchError::NotYetPublished) => {
                        mark(&store, &item.race_id, 3, StepStatus::Pending);
                        ItemOutcome::Pending
                    }
                    Err(FetchError::Cancelled) => {
                        // Leave the item retryable; the pool notices the
                        // flag before the next item.
                        mark(&store, &item.race_id, 3, StepStatus::Pending);
                        ItemOutcome::Pending
                    }
                    Err(e) => {
                        error!(race_id = %item.race_id, error = %e, "Race detail fetch failed");
                        mark(&store, &item.race_id, 3, StepStatus::Error);
                        ItemOutcome::Error
                    }
                }
            }
        })
        .await;

        let message = format!(
            "{}/{} races saved ({} pending upstream, {} errors){}",
            stats.saved,
            total,
            stats.pending,
            stats.errors,
            if stats.cancelled { ", cancelled" } else { "" }
        );
        if stats.clean() {
            StageOutcome::ok(message, stats.saved)
        } else {
            StageOutcome::failed(message, stats.saved)
        }
    }
}
