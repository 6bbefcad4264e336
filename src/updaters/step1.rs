//! Stage 1: monthly cup index.
//!
//! The month list is fetched sequentially; a window rarely spans more
//! than a few months and the monthly endpoint is the heaviest payload
//! provider W serves.

use crate::cancel::CancelFlag;
use crate::dates;
use crate::db::Store;
use crate::models::StageOutcome;
use crate::savers::Step1Saver;
use crate::scrapers::http::FetchError;
use crate::scrapers::winticket::WinticketClient;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct Step1Updater {
    client: Arc<WinticketClient>,
    saver: Step1Saver,
    cancel: CancelFlag,
}

impl Step1Updater {
    pub fn new(client: Arc<WinticketClient>, store: Store, cancel: CancelFlag) -> Self {
        Self {
            client,
            saver: Step1Saver::new(store),
            cancel,
        }
    }

    pub async fn update_window(&self, start: NaiveDate, end: NaiveDate) -> StageOutcome {
        let months = match dates::months_in_window(start, end) {
            Ok(months) => months,
            Err(e) => return StageOutcome::failed(format!("invalid window: {e}"), 0),
        };

        let mut cups_saved = 0u64;
        let mut errors = 0u64;

        for month in months {
            if self.cancel.is_cancelled() {
                return StageOutcome::failed(
                    format!("cancelled after {cups_saved} cups"),
                    cups_saved,
                );
            }

            let month_compact = dates::compact(month);
            match self.client.monthly_cups(&month_compact).await {
                Ok(response) => match self.saver.save_month(&response.month, &self.cancel) {
                    Ok(counts) => {
                        info!(month = %month_compact, cups = counts.cups, "Month ingested");
                        cups_saved += counts.cups as u64;
                    }
                    Err(e) => {
                        error!(month = %month_compact, error = %e, "Month save failed");
                        errors += 1;
                    }
                },
                Err(FetchError::NotYetPublished) => {
                    // Months in the future simply do not exist yet.
                    warn!(month = %month_compact, "Month index not published");
                }
                Err(FetchError::Cancelled) => {
                    return StageOutcome::failed(
                        format!("cancelled after {cups_saved} cups"),
                        cups_saved,
                    );
                }
                Err(e) => {
                    error!(month = %month_compact, error = %e, "Month fetch failed");
                    errors += 1;
                }
            }
        }

        let message = format!("saved {cups_saved} cups ({errors} month errors)");
        if errors == 0 {
            StageOutcome::ok(message, cups_saved)
        } else {
            StageOutcome::failed(message, cups_saved)
        }
    }
}
