//! Stage 4: odds snapshot fan-out.
//!
//! Runs on the full worker budget. A 200 with an empty odds bundle means
//! the board is not on sale yet and is treated like a 404: the ledger
//! stays pending.

use super::step3::mark;
use super::{run_pool, ItemOutcome};
use crate::cancel::CancelFlag;
use crate::db::Store;
use crate::extractors::{Step4Extractor, WorkWindow};
use crate::models::{StageOutcome, StepStatus};
use crate::savers::Step4Saver;
use crate::scrapers::http::FetchError;
use crate::scrapers::winticket::WinticketClient;
use std::sync::Arc;
use tracing::{debug, error};

pub struct Step4Updater {
    client: Arc<WinticketClient>,
    store: Store,
    saver: Arc<Step4Saver>,
    extractor: Step4Extractor,
    workers: usize,
    cancel: CancelFlag,
}

impl Step4Updater {
    pub fn new(
        client: Arc<WinticketClient>,
        store: Store,
        workers: usize,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            client,
            saver: Arc::new(Step4Saver::new(store.clone())),
            extractor: Step4Extractor::new(store.clone()),
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
            return StageOutcome::ok("no odds to update", 0);
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
                mark(&store, &item.race_id, 4, StepStatus::Processing);

                match client
                    .race_odds(&item.cup_id, item.schedule_index, item.number)
                    .await
                {
                    Ok(response) if response.odds.is_empty() => {
                        debug!(race_id = %item.race_id, "Odds board not on sale yet");
                        mark(&store, &item.race_id, 4, StepStatus::Pending);
                        ItemOutcome::Pending
                    }
                    Ok(response) => match saver.save_odds(&item, &response.odds) {
                        Ok(rows) => ItemOutcome::Saved(rows as u64),
                        Err(e) => {
                            error!(race_id = %item.race_id, error = %e, "Odds save failed");
                            mark(&store, &item.race_id, 4, StepStatus::Error);
                            ItemOutcome::Error
                        }
                    },
                    Err(FetchError::NotYetPublished) => {
                        mark(&store, &item.race_id, 4, StepStatus::Pending);
                        ItemOutcome::Pending
                    }
                    Err(FetchError::Cancelled) => {
                        mark(&store, &item.race_id, 4, StepStatus::Pending);
                        ItemOutcome::Pending
                    }
                    Err(e) => {
                        error!(race_id = %item.race_id, error = %e, "Odds fetch failed");
                        mark(&store, &item.race_id, 4, StepStatus::Error);
                        ItemOutcome::Error
                    }
                }
            }
        })
        .await;

        let message = format!(
            "{}/{} odds snapshots saved ({} pending, {} errors){}",
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
