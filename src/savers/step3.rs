//! Stage 3 saver: entries, player records and the line prediction.
//!
//! One transaction per race; `step3_status` flips to `completed` in the
//! same commit as the rows it certifies.

use crate::db::{set_step_status_tx, Store};
use crate::models::{RaceItem, StepStatus};
use crate::scrapers::winticket::RaceDetailResponse;
use anyhow::Result;
use rusqlite::params;
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Default, Clone, Copy)]
pub struct Step3Counts {
    pub entries: usize,
    pub players: usize,
}

pub struct Step3Saver {
    store: Store,
}

impl Step3Saver {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn save_race_detail(
        &self,
        item: &RaceItem,
        detail: &RaceDetailResponse,
    ) -> Result<Step3Counts> {
        let records: HashMap<&str, _> = detail
            .records
            .iter()
            .map(|r| (r.player_id.as_str(), r))
            .collect();
        let players: HashMap<&str, _> =
            detail.players.iter().map(|p| (p.id.as_str(), p)).collect();

        let counts = self.store.in_tx(|tx| {
            let now = Store::now();
            let mut counts = Step3Counts::default();

            // The detail payload carries fresher race fields (status,
            // start time, weather) than the cup index did.
            if let Some(race) = &detail.race {
                tx.execute(
                    "UPDATE races SET
                        name = ?1, race_type = ?2, distance = ?3, lap = ?4,
                        entries_number = ?5, is_grade_race = ?6, status = ?7,
                        cancel = ?8, cancel_reason = ?9, start_at = ?10,
                        close_at = ?11, decided_at = ?12, weather = ?13,
                        wind_speed = ?14, updated_at = ?15
                     WHERE race_id = ?16",
                    params![
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
                        item.race_id,
                    ],
                )?;
            }

            for entry in &detail.entries {
                let record = records.get(entry.player_id.as_str());
                let player = players.get(entry.player_id.as_str());
                tx.execute(
                    "INSERT OR REPLACE INTO entries (
                        race_id, frame, player_id, name, is_absent, style,
                        race_point, first_rate, second_rate, third_rate,
                        updated_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        item.race_id,
                        entry.number,
                        entry.player_id,
                        player.map(|p| p.name.as_str()).unwrap_or(""),
                        entry.absent as i64,
                        record.map(|r| r.style.as_str()).unwrap_or(""),
                        record.map(|r| r.race_point).unwrap_or(0.0),
                        record.map(|r| r.first_rate).unwrap_or(0.0),
                        record.map(|r| r.second_rate).unwrap_or(0.0),
                        record.map(|r| r.third_rate).unwrap_or(0.0),
                        now,
                    ],
                )?;
                counts.entries += 1;
            }

            for player in &detail.players {
                tx.execute(
                    "INSERT OR REPLACE INTO players (
                        player_id, name, yomi, birthday, age, prefecture,
                        term, class, updated_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        player.id,
                        player.name,
                        player.yomi,
                        player.birthday,
                        player.age,
                        player.prefecture,
                        player.term,
                        player.class,
                        now,
                    ],
                )?;
                counts.players += 1;
            }

            if let Some(line) = &detail.line_prediction {
                tx.execute(
                    "INSERT OR REPLACE INTO line_predictions (
                        race_id, line_type, line_formation, updated_at
                     ) VALUES (?1, ?2, ?3, ?4)",
                    params![item.race_id, line.line_type, line.line_formation, now],
                )?;
            }

            set_step_status_tx(tx, &item.race_id, 3, StepStatus::Completed)?;
            Ok(counts)
        })?;

        info!(
            race_id = %item.race_id,
            entries = counts.entries,
            players = counts.players,
            "Saved race detail"
        );
        Ok(counts)
    }
}
