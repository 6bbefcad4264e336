//! Stage 2: cup detail -> schedules and races.
//!
//! Sequential over cups; each cup is one fetch plus one transactional
//! save, and cup counts are small enough that pool fan-out buys nothing
//! against the per-host rate limit.

use crate::cancel::CancelFlag;
use crate::db::Store;
use crate::extractors::{Step2Extractor, WorkWindow};
use crate::models::StageOutcome;
use crate::savers::Step2Saver;
use crate::scrapers::http::FetchError;
use crate::scrapers::winticket::WinticketClient;
use std::sync::Arc;
use tracing::{error, info};

pub struct Step2Updater {
    client: Arc<WinticketClient>,
    extractor: Step2Extractor,
    saver: Step2Saver,
    cancel: CancelFlag,
}

impl Step2Updater {
    pub fn new(client: Arc<WinticketClient>, store: Store, cancel: CancelFlag) -> Self {
        Self {
            client,
            extractor: Step2Extractor::new(store.clone()),
            saver: Step2Saver::new(store),
            cancel,
        }
    }

    pub async fn update_window(&self, window: &WorkWindow) -> StageOutcome {
        let cup_ids = match self.extractor.extract(window) {
            Ok(ids) => ids,
            Err(e) => return StageOutcome::failed(format!("extraction failed: {e}"), 0),
        };
        if cup_ids.is_empty() {
            return StageOutcome::ok("no cups to update", 0);
        }

        let mut saved_rows = 0u64;
        let mut errors = 0u64;

        for cup_id in &cup_ids {
            if self.cancel.is_cancelled() {
                return StageOutcome::failed(
                    format!("cancelled after {saved_rows} rows"),
                    saved_rows,
                );
            }

            match self.client.cup_detail(cup_id).await {
                Ok(detail) => match self.saver.save_cup_detail(cup_id, &detail) {
                    Ok(counts) => saved_rows += counts.total() as u64,
                    Err(e) => {
                        error!(cup_id, error = %e, "Cup save failed");
                        errors += 1;
                    }
                },
                Err(FetchError::NotYetPublished) => {
                    info!(cup_id, "Cup detail not published yet");
                }
                Err(FetchError::Cancelled) => {
                    return StageOutcome::failed(
                        format!("cancelled after {saved_rows} rows"),
                        saved_rows,
                    );
                }
                Err(e) => {
                    error!(cup_id, error = %e, "Cup fetch failed");
                    errors += 1;
                }
            }
        }

        let message = format!(
            "saved {saved_rows} schedule/race rows across {} cups ({errors} errors)",
            cup_ids.len()
        );
        if errors == 0 {
            StageOutcome::ok(message, saved_rows)
        } else {
            StageOutcome::failed(message, saved_rows)
        }
    }
}
