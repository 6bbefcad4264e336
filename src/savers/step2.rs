//! Stage 2 saver: schedules and races for one cup.
//!
//! The schedules+races+initial-ledger write is a single transaction per
//! cup, so a new race can never exist without its `race_status` row.

use crate::dates;
use crate::db::Store;
use crate::scrapers::winticket::CupDetailResponse;
use anyhow::Result;
use rusqlite::params;
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Default, Clone, Copy)]
pub struct Step2Counts {
    pub schedules: usize,
    pub races: usize,
}

impl Step2Counts {
    pub fn total(&self) -> usize {
        self.schedules + self.races
    }
}

pub struct Step2Saver {
    store: Store,
}

impl Step2Saver {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn save_cup_detail(&self, cup_id: &str, detail: &CupDetailResponse) -> Result<Step2Counts> {
        // schedule_id -> 1-based index, for races whose id must be derived.
        let index_by_schedule: HashMap<&str, i64> = detail
            .schedules
            .iter()
            .map(|s| (s.id.as_str(), s.index))
            .collect();

        let counts = self.store.in_tx(|tx| {
            let now = Store::now();
            let mut counts = Step2Counts::default();

            if let Some(cup) = &detail.cup {
                tx.execute(
                    "INSERT OR REPLACE INTO cups (
                        cup_id, name, start_date, end_date, duration, grade,
                        venue_id, labels, players_unfixed, updated_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        cup.id,
                        cup.name,
                        dates::to_iso_str(&cup.start_date),
                        dates::to_iso_str(&cup.end_date),
                        cup.duration,
                        cup.grade,
                        cup.venue_id,
                        cup.labels.join(","),
                        cup.players_unfixed as i64,
                        now,
                    ],
                )?;
            }

            for schedule in &detail.schedules {
                tx.execute(
                    "INSERT OR REPLACE INTO schedules (
                        schedule_id, cup_id, date, schedule_index,
                        entries_unfixed, updated_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        schedule.id,
                        cup_id,
                        dates::to_compact_str(&schedule.date),
                        if schedule.index > 0 {
                            Some(schedule.index)
                        } else {
                            None
                        },
                        schedule.entries_unfixed as i64,
                        now,
                    ],
                )?;
                counts.schedules += 1;
            }

            for race in &detail.races {
                let race_id = if race.id.is_empty() {
                    let Some(index) = index_by_schedule.get(race.schedule_id.as_str()) else {
                        warn!(
                            cup_id,
                            schedule_id = %race.schedule_id,
                            number = race.number,
                            "Race references unknown schedule, skipping"
                        );
                        continue;
                    };
                    format!("{cup_id}_{index}_{}", race.number)
                } else {
                    race.id.clone()
                };

                tx.execute(
                    "INSERT OR REPLACE INTO races (
                        race_id, cup_id, schedule_id, number, name, race_type,
                        distance, lap, entries_number, is_grade_race, status,
                        cancel, cancel_reason, start_at, close_at, decided_at,
                        weather, wind_speed, updated_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                               ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
                    params![
                        race_id,
                        cup_id,
                        race.schedule_id,
                        race.number,
                        race.name,
                        race.race_type,
                        race.distance,
                        race.lap,
                        race.entries_number,
                        race.is_grade_race as i64,
                        race.status,
                        race.cancel as i64,
                        race.cancel_reason,
                        race.start_at,
                        race.close_at,
                        race.decided_at,
                        race.weather,
                        race.wind_speed,
                        now,
                    ],
                )?;

                // New races enter the ledger with every step pending;
                // replacing an existing race must not reset its progress.
                tx.execute(
                    "INSERT OR IGNORE INTO race_status (
                        race_id, step1_status, step2_status, step3_status,
                        step4_status, step5_status, updated_at
                     ) VALUES (?1, 'pending', 'pending', 'pending', 'pending', 'pending', ?2)",
                    params![race_id, now],
                )?;
                counts.races += 1;
            }

            Ok(counts)
        })?;

        info!(
            cup_id,
            schedules = counts.schedules,
            races = counts.races,
            "Saved cup detail"
        );
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StepStatus;

    fn detail() -> CupDetailResponse {
        let raw = r#"{
            "cup": {"id":"c1","name":"June Cup","startDate":"20240601","endDate":"20240603","venueId":"v1"},
            "schedules": [
                {"id":"s1","date":"2024-06-01","index":1},
                {"id":"s2","date":"2024-06-02","index":2}
            ],
            "races": [
                {"id":"","scheduleId":"s1","number":1,"name":"First","status":1},
                {"id":"race-x","scheduleId":"s2","number":2,"name":"Second","status":1},
                {"id":"","scheduleId":"unknown","number":3}
            ]
        }"#;
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn creates_races_with_ledger_rows() {
        let store = Store::open_in_memory().unwrap();
        let saver = Step2Saver::new(store.clone());
        let counts = saver.save_cup_detail("c1", &detail()).unwrap();
        assert_eq!(counts.schedules, 2);
        // The race with an unknown schedule is skipped.
        assert_eq!(counts.races, 2);

        // Derived race id uses the schedule index, not the schedule id.
        let derived: Option<String> = store
            .query_one(
                "SELECT race_id FROM races WHERE schedule_id='s1'",
                &[],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(derived.as_deref(), Some("c1_1_1"));

        // Exactly one ledger row per race, all pending.
        let statuses: Option<i64> = store
            .query_one(
                "SELECT COUNT(*) FROM race_status WHERE step5_status='pending'",
                &[],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(statuses, Some(2));

        // Cup dates are normalized to ISO.
        let start: Option<String> = store
            .query_one("SELECT start_date FROM cups WHERE cup_id='c1'", &[], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(start.as_deref(), Some("2024-06-01"));
    }

    #[test]
    fn rerun_preserves_ledger_progress() {
        let store = Store::open_in_memory().unwrap();
        let saver = Step2Saver::new(store.clone());
        saver.save_cup_detail("c1", &detail()).unwrap();
        store
            .set_step_status("c1_1_1", 3, StepStatus::Completed)
            .unwrap();

        saver.save_cup_detail("c1", &detail()).unwrap();
        assert_eq!(
            store.step_status("c1_1_1", 3).unwrap(),
            Some(StepStatus::Completed)
        );
        let races: Option<i64> = store
            .query_one("SELECT COUNT(*) FROM races", &[], |r| r.get(0))
            .unwrap();
        assert_eq!(races, Some(2));
    }

    #[test]
    fn schedule_dates_stored_compact() {
        let store = Store::open_in_memory().unwrap();
        Step2Saver::new(store.clone())
            .save_cup_detail("c1", &detail())
            .unwrap();
        let date: Option<String> = store
            .query_one(
                "SELECT date FROM schedules WHERE schedule_id='s1'",
                &[],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(date.as_deref(), Some("20240601"));
    }
}
