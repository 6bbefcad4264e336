//! Stage 5 saver: results, payouts and lap positions.
//!
//! The three table writes are one transaction: a race ends up with all
//! three row sets or none of them. A page with no finish order is a parse
//! failure, not an empty success.

use crate::db::{set_step_status_tx, Store};
use crate::models::{RaceItem, StepStatus};
use crate::scrapers::yenjoy_html::ResultPage;
use anyhow::{bail, Result};
use rusqlite::params;
use tracing::{info, warn};

#[derive(Debug, Default, Clone, Copy)]
pub struct Step5Counts {
    pub results: usize,
    pub payouts: usize,
    pub laps: usize,
}

impl Step5Counts {
    pub fn total(&self) -> usize {
        self.results + self.payouts + self.laps
    }
}

pub struct Step5Saver {
    store: Store,
}

impl Step5Saver {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn save_result_page(&self, item: &RaceItem, page: &ResultPage) -> Result<Step5Counts> {
        if page.results.is_empty() {
            bail!(
                "result page for race {} had no finish order (issues: {:?})",
                item.race_id,
                page.issues
            );
        }
        if !page.issues.is_empty() {
            warn!(race_id = %item.race_id, issues = ?page.issues, "Result page parsed with issues");
        }

        let counts = self.store.in_tx(|tx| {
            let now = Store::now();
            let mut counts = Step5Counts::default();

            // Replace wholesale so a forced re-run converges on the page
            // content instead of accumulating.
            tx.execute("DELETE FROM results WHERE race_id = ?1", params![item.race_id])?;
            tx.execute("DELETE FROM payouts WHERE race_id = ?1", params![item.race_id])?;
            tx.execute(
                "DELETE FROM lap_positions WHERE race_id = ?1",
                params![item.race_id],
            )?;

            for row in &page.results {
                tx.execute(
                    "INSERT INTO results (
                        race_id, rank, frame, player_id, player_name, age,
                        prefecture, term, class, margin, last_lap_time,
                        winning_move, updated_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    params![
                        item.race_id,
                        row.rank,
                        row.frame,
                        row.player_id,
                        row.player_name,
                        row.age,
                        row.prefecture,
                        row.term,
                        row.class,
                        row.margin,
                        row.last_lap_time,
                        row.winning_move,
                        now,
                    ],
                )?;
                counts.results += 1;
            }

            for row in &page.payouts {
                tx.execute(
                    "INSERT OR REPLACE INTO payouts (
                        race_id, ticket_type, combination, amount, popularity,
                        updated_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        item.race_id,
                        row.ticket_type,
                        row.combination,
                        row.amount,
                        row.popularity,
                        now,
                    ],
                )?;
                counts.payouts += 1;
            }

            for row in &page.laps {
                tx.execute(
                    "INSERT OR REPLACE INTO lap_positions (
                        race_id, section, frame, player_name, x, y, updated_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        item.race_id,
                        row.section,
                        row.frame,
                        row.player_name,
                        row.x,
                        row.y,
                        now,
                    ],
                )?;
                counts.laps += 1;
            }

            // Weather arrives with the result page, not the race index.
            if page.weather.is_some() || page.wind_speed.is_some() {
                tx.execute(
                    "UPDATE races SET weather = COALESCE(?1, weather), updated_at = ?2
                     WHERE race_id = ?3",
                    params![page.weather, now, item.race_id],
                )?;
            }

            set_step_status_tx(tx, &item.race_id, 5, StepStatus::Completed)?;
            Ok(counts)
        })?;

        info!(
            race_id = %item.race_id,
            results = counts.results,
            payouts = counts.payouts,
            laps = counts.laps,
            "Saved result page"
        );
        Ok(counts)
    }
}
