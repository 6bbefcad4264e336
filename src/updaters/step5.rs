//! Stage 5: provider Y result pages.
//!
//! Same pool shape as stage 4 but on the stricter provider Y pacing
//! class. Before fanning out, the monthly calendar is probed once per
//! distinct race date; dates whose results are not linked yet defer all
//! their races to `pending` without touching the per-race pages. The URL
//! needs a venue code; races at venues missing from the code table are
//! marked `error` instead of fetched with a guessed code.

use super::step3::mark;
use super::{run_pool, ItemOutcome};
use crate::cancel::CancelFlag;
use crate::db::Store;
use crate::extractors::{Step5Extractor, WorkWindow};
use crate::models::{RaceItem, StageOutcome, StepStatus};
use crate::savers::Step5Saver;
use crate::scrapers::http::FetchError;
use crate::scrapers::yenjoy::YenjoyClient;
use crate::venues::venue_code_for_slug;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct Step5Updater {
    client: Arc<YenjoyClient>,
    store: Store,
    saver: Arc<Step5Saver>,
    extractor: Step5Extractor,
    workers: usize,
    cancel: CancelFlag,
}

impl Step5Updater {
    pub fn new(
        client: Arc<YenjoyClient>,
        store: Store,
        workers: usize,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            client,
            saver: Arc::new(Step5Saver::new(store.clone())),
            extractor: Step5Extractor::new(store.clone()),
            store,
            workers,
            cancel,
        }
    }

    /// Split the work list by the calendar probe: races on dates whose
    /// results are already linked proceed, the rest stay `pending`. Probe
    /// failures other than a missing month index let the date through, so
    /// a flaky calendar never blocks the stage.
    async fn defer_unpublished(&self, items: Vec<RaceItem>) -> Result<(Vec<RaceItem>, u64), StageOutcome> {
        let mut published: HashMap<String, bool> = HashMap::new();
        let mut ready = Vec::with_capacity(items.len());
        let mut deferred = 0u64;

        for item in items {
            if self.cancel.is_cancelled() {
                return Err(StageOutcome::failed("cancelled during calendar check", 0));
            }
            let is_published = match published.get(item.date.as_str()) {
                Some(&v) => v,
                None => {
                    let v = match self.client.results_published(&item.date).await {
                        Ok(v) => v,
                        Err(FetchError::Cancelled) => {
                            return Err(StageOutcome::failed("cancelled during calendar check", 0));
                        }
                        Err(e) => {
                            warn!(date = %item.date, error = %e, "Calendar probe failed, assuming published");
                            true
                        }
                    };
                    published.insert(item.date.clone(), v);
                    v
                }
            };
            if is_published {
                ready.push(item);
            } else {
                mark(&self.store, &item.race_id, 5, StepStatus::Pending);
                deferred += 1;
            }
        }
        Ok((ready, deferred))
    }

    pub async fn update_window(&self, window: &WorkWindow) -> StageOutcome {
        let items = match self.extractor.extract(window) {
            Ok(items) => items,
            Err(e) => return StageOutcome::failed(format!("extraction failed: {e}"), 0),
        };
        if items.is_empty() {
            return StageOutcome::ok("no results to update", 0);
        }
        let total = items.len();

        let (ready, deferred) = match self.defer_unpublished(items).await {
            Ok(split) => split,
            Err(outcome) => return outcome,
        };
        if ready.is_empty() {
            info!(deferred, "All stage 5 races await the calendar");
            return StageOutcome::ok(
                format!("0/{total} result pages saved ({deferred} pending upstream)"),
                0,
            );
        }

        let client = self.client.clone();
        let store = self.store.clone();
        let saver = self.saver.clone();

        let stats = run_pool(ready, self.workers, self.cancel.clone(), move |item| {
            let client = client.clone();
            let store = store.clone();
            let saver = saver.clone();
            async move {
                let Some(venue_code) = venue_code_for_slug(&item.venue_slug) else {
                    warn!(
                        race_id = %item.race_id,
                        venue_slug = %item.venue_slug,
                        "No venue code mapping, refusing to fetch result"
                    );
                    mark(&store, &item.race_id, 5, StepStatus::Error);
                    return ItemOutcome::Error;
                };

                mark(&store, &item.race_id, 5, StepStatus::Processing);

                match client
                    .race_result(venue_code, &item.cup_start_date, &item.date, item.number)
                    .await
                {
                    Ok(page) if page.results.is_empty() => {
                        // The page frame exists before the finish order is
                        // posted; same treatment as a 404.
                        debug!(race_id = %item.race_id, "Result page has no finish order yet");
                        mark(&store, &item.race_id, 5, StepStatus::Pending);
                        ItemOutcome::Pending
                    }
                    Ok(page) => match saver.save_result_page(&item, &page) {
                        Ok(counts) => ItemOutcome::Saved(counts.total() as u64),
                        Err(e) => {
                            error!(race_id = %item.race_id, error = %e, "Result save failed");
                            mark(&store, &item.race_id, 5, StepStatus::Error);
                            ItemOutcome::Error
                        }
                    },
                    Err(FetchError::NotYetPublished) => {
                        mark(&store, &item.race_id, 5, StepStatus::Pending);
                        ItemOutcome::Pending
                    }
                    Err(FetchError::Cancelled) => {
                        mark(&store, &item.race_id, 5, StepStatus::Pending);
                        ItemOutcome::Pending
                    }
                    Err(e) => {
                        error!(race_id = %item.race_id, error = %e, "Result fetch failed");
                        mark(&store, &item.race_id, 5, StepStatus::Error);
                        ItemOutcome::Error
                    }
                }
            }
        })
        .await;

        let message = format!(
            "{}/{} result pages saved ({} pending, {} errors){}",
            stats.saved,
            total,
            stats.pending + deferred,
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
