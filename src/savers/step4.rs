//! Stage 4 saver: odds snapshot replacement.
//!
//! Snapshot semantics, not append: within one transaction the existing
//! rows for the race are deleted, the fresh board is inserted, an
//! `odds_status` event is recorded, and `step4_status` completes. An
//! observer never sees a half-replaced board.

use crate::db::{set_step_status_tx, Store};
use crate::models::{RaceItem, StepStatus, ODDS_UNIT_PRICE, RACE_STATUS_FINISHED};
use crate::scrapers::winticket::OddsBundleDto;
use anyhow::Result;
use rusqlite::params;
use tracing::info;

pub struct Step4Saver {
    store: Store,
}

impl Step4Saver {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Replace the odds snapshot for one race. Returns the number of rows
    /// in the new snapshot.
    pub fn save_odds(&self, item: &RaceItem, bundle: &OddsBundleDto) -> Result<usize> {
        let per_kind = bundle.rows();
        let is_final = item.race_status == Some(RACE_STATUS_FINISHED);

        let written = self.store.in_tx(|tx| {
            let now = Store::now();
            let mut written = 0usize;

            for (kind, rows) in &per_kind {
                let table = kind.table();
                tx.execute(
                    &format!("DELETE FROM {table} WHERE race_id = ?1"),
                    params![item.race_id],
                )?;
                let sql = format!(
                    "INSERT INTO {table} (
                        race_id, key, odds, min_odds, max_odds, unit_price,
                        payoff_price, popularity, is_absent, updated_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                );
                let mut stmt = tx.prepare_cached(&sql)?;
                for row in rows {
                    stmt.execute(params![
                        item.race_id,
                        row.key,
                        row.odds,
                        row.min_odds,
                        row.max_odds,
                        ODDS_UNIT_PRICE,
                        row.payoff_price(),
                        row.popularity,
                        row.is_absent as i64,
                        now,
                    ])?;
                    written += 1;
                }
            }

            tx.execute(
                "INSERT INTO odds_status (race_id, fetched_at, is_final, payout_status)
                 VALUES (?1, ?2, ?3, '')",
                params![item.race_id, now, is_final as i64],
            )?;

            set_step_status_tx(tx, &item.race_id, 4, StepStatus::Completed)?;
            Ok(written)
        })?;

        info!(
            race_id = %item.race_id,
            rows = written,
            is_final,
            "Saved odds snapshot"
        );
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::types::Value;

    fn seeded(race_status: Option<i64>) -> (Store, RaceItem) {
        let store = Store::open_in_memory().unwrap();
        let now = Store::now();
        store
            .exec(
                "INSERT INTO races (race_id, cup_id, schedule_id, number, status, updated_at)
                 VALUES ('r1', 'c1', 's1', 1, ?1, ?2)",
                &[
                    race_status.map(Value::Integer).unwrap_or(Value::Null),
                    Value::Text(now.clone()),
                ],
            )
            .unwrap();
        store
            .exec(
                "INSERT INTO race_status (race_id, step4_status, updated_at)
                 VALUES ('r1', 'processing', ?1)",
                &[Value::Text(now)],
            )
            .unwrap();
        let item = RaceItem {
            race_id: "r1".into(),
            cup_id: "c1".into(),
            schedule_id: "s1".into(),
            schedule_index: 1,
            number: 1,
            venue_id: "v1".into(),
            date: "20240601".into(),
            cup_start_date: "20240601".into(),
            venue_slug: String::new(),
            race_status,
        };
        (store, item)
    }

    fn bundle(trifecta_odds: f64) -> OddsBundleDto {
        let raw = format!(
            r#"{{
                "trifecta": [{{"number1":1,"number2":2,"number3":3,"odds":{trifecta_odds},"popularityOrder":1}}],
                "quinella": [{{"number1":1,"number2":2,"odds":3.4,"popularityOrder":1}}],
                "win": [{{"number1":1,"odds":1.8,"popularityOrder":1}}]
            }}"#
        );
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn snapshot_replaces_not_accumulates() {
        let (store, item) = seeded(Some(1));
        let saver = Step4Saver::new(store.clone());

        assert_eq!(saver.save_odds(&item, &bundle(45.0)).unwrap(), 3);
        assert_eq!(saver.save_odds(&item, &bundle(50.5)).unwrap(), 3);

        let rows: Option<i64> = store
            .query_one("SELECT COUNT(*) FROM odds_trifecta", &[], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, Some(1));
        let odds: Option<f64> = store
            .query_one(
                "SELECT odds FROM odds_trifecta WHERE race_id='r1' AND key='1-2-3'",
                &[],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(odds, Some(50.5));
        let payoff: Option<i64> = store
            .query_one(
                "SELECT payoff_price FROM odds_trifecta WHERE race_id='r1'",
                &[],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(payoff, Some(5050));

        // One odds_status event per snapshot fetch.
        let events: Option<i64> = store
            .query_one("SELECT COUNT(*) FROM odds_status", &[], |r| r.get(0))
            .unwrap();
        assert_eq!(events, Some(2));
        assert_eq!(
            store.step_status("r1", 4).unwrap(),
            Some(StepStatus::Completed)
        );
    }

    #[test]
    fn final_snapshot_flagged_for_finished_race() {
        let (store, item) = seeded(Some(RACE_STATUS_FINISHED));
        Step4Saver::new(store.clone())
            .save_odds(&item, &bundle(45.0))
            .unwrap();
        let is_final: Option<i64> = store
            .query_one("SELECT is_final FROM odds_status", &[], |r| r.get(0))
            .unwrap();
        assert_eq!(is_final, Some(1));
    }
}
