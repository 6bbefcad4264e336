//! Work-list extraction for stages 2 through 5.
//!
//! Each extractor answers one question: which items must its stage process
//! for a window, honoring the `race_status` ledger unless `force` is set?
//! Stage 1 needs no extractor; its work list is the calendar months of
//! the window.

use crate::dates;
use crate::db::Store;
use crate::models::{RaceItem, RACE_STATUS_FINISHED};
use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::types::Value;
use tracing::{debug, info};

/// Common extraction inputs: the date window, an optional cup filter that
/// overrides it, and the ledger bypass.
#[derive(Debug, Clone)]
pub struct WorkWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub cup_filter: Option<Vec<String>>,
    pub force: bool,
}

impl WorkWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end,
            cup_filter: None,
            force: false,
        }
    }

    pub fn with_cups(mut self, cups: Vec<String>) -> Self {
        self.cup_filter = (!cups.is_empty()).then_some(cups);
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    fn iso_bounds(&self) -> (String, String) {
        (dates::iso(self.start), dates::iso(self.end))
    }

    fn compact_bounds(&self) -> (String, String) {
        (dates::compact(self.start), dates::compact(self.end))
    }
}

fn placeholders(start_at: usize, count: usize) -> String {
    (start_at..start_at + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn race_item_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RaceItem> {
    Ok(RaceItem {
        race_id: row.get(0)?,
        cup_id: row.get(1)?,
        schedule_id: row.get(2)?,
        schedule_index: row.get(3)?,
        number: row.get(4)?,
        venue_id: row.get(5)?,
        date: row.get(6)?,
        cup_start_date: dates::to_compact_str(&row.get::<_, String>(7)?),
        venue_slug: row.get(8)?,
        race_status: row.get(9)?,
    })
}

const RACE_ITEM_SELECT: &str = "
    SELECT r.race_id, r.cup_id, r.schedule_id, s.schedule_index, r.number,
           c.venue_id, s.date, c.start_date,
           COALESCE(v.slug, ''), r.status
    FROM races r
    JOIN schedules s ON r.schedule_id = s.schedule_id
    JOIN cups c ON r.cup_id = c.cup_id
    JOIN race_status rs ON r.race_id = rs.race_id
    LEFT JOIN venues v ON c.venue_id = v.venue_id
";

/// Stage 2: cups whose span overlaps the window.
pub struct Step2Extractor {
    store: Store,
}

impl Step2Extractor {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn extract(&self, window: &WorkWindow) -> Result<Vec<String>> {
        if let Some(cups) = &window.cup_filter {
            info!(count = cups.len(), "Stage 2 using explicit cup list");
            return Ok(cups.clone());
        }

        let (start, end) = window.iso_bounds();
        // Cups still carrying races the later stages have not ingested are
        // the incremental set; step3 pending is the proxy for "not yet
        // fully ingested" because stage 3 is the first per-race stage.
        let status_condition = if window.force {
            ""
        } else {
            " AND EXISTS (
                SELECT 1 FROM schedules s
                JOIN races r ON s.schedule_id = r.schedule_id
                LEFT JOIN race_status rs ON r.race_id = rs.race_id
                WHERE s.cup_id = cups.cup_id
                  AND (rs.step3_status IS NULL OR rs.step3_status = 'pending')
            )"
        };
        let sql = format!(
            "SELECT DISTINCT cup_id FROM cups
             WHERE NOT (end_date < ?1 OR start_date > ?2){status_condition}
             ORDER BY start_date, cup_id"
        );
        let cups = self.store.query_rows(
            &sql,
            &[Value::Text(start), Value::Text(end)],
            |row| row.get::<_, String>(0),
        )?;
        info!(
            count = cups.len(),
            force = window.force,
            "Stage 2 extracted cups"
        );
        Ok(cups)
    }
}

/// Stage 3: race tuples needing entries/players/line prediction.
pub struct Step3Extractor {
    store: Store,
}

impl Step3Extractor {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn extract(&self, window: &WorkWindow) -> Result<Vec<RaceItem>> {
        let mut conditions = vec!["s.schedule_index IS NOT NULL".to_string()];
        let mut params: Vec<Value> = Vec::new();

        if let Some(cups) = &window.cup_filter {
            conditions.push(format!(
                "r.cup_id IN ({})",
                placeholders(1, cups.len())
            ));
            params.extend(cups.iter().cloned().map(Value::Text));
        } else {
            let (start, end) = window.compact_bounds();
            conditions.push(format!(
                "s.date BETWEEN ?{} AND ?{}",
                params.len() + 1,
                params.len() + 2
            ));
            params.push(Value::Text(start));
            params.push(Value::Text(end));
        }

        if !window.force {
            // Completed races are skipped; pending, processing, error and
            // missing statuses are all eligible again.
            conditions.push(
                "(rs.step3_status IS NULL OR rs.step3_status != 'completed')".to_string(),
            );
        }

        let sql = format!(
            "{RACE_ITEM_SELECT} WHERE {} ORDER BY s.date, r.schedule_id, r.number",
            conditions.join(" AND ")
        );
        let items = self.store.query_rows(&sql, &params, race_item_from_row)?;
        info!(
            count = items.len(),
            force = window.force,
            "Stage 3 extracted races"
        );
        Ok(items)
    }
}

/// Stage 4: races needing an odds snapshot.
pub struct Step4Extractor {
    store: Store,
}

impl Step4Extractor {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn extract(&self, window: &WorkWindow) -> Result<Vec<RaceItem>> {
        let mut conditions = vec!["s.schedule_index IS NOT NULL".to_string()];
        let mut params: Vec<Value> = Vec::new();

        if let Some(cups) = &window.cup_filter {
            conditions.push(format!("r.cup_id IN ({})", placeholders(1, cups.len())));
            params.extend(cups.iter().cloned().map(Value::Text));
        } else {
            let (start, end) = window.compact_bounds();
            conditions.push(format!(
                "s.date BETWEEN ?{} AND ?{}",
                params.len() + 1,
                params.len() + 2
            ));
            params.push(Value::Text(start));
            params.push(Value::Text(end));
        }

        if !window.force {
            // Unfinished races always qualify. Finished races qualify only
            // when a pre-finish snapshot exists (an odds_status row) and the
            // final board should replace it.
            conditions.push(format!(
                "(r.status IS NULL OR r.status != {RACE_STATUS_FINISHED}
                  OR EXISTS (SELECT 1 FROM odds_status os WHERE os.race_id = r.race_id))"
            ));
        }

        let sql = format!(
            "{RACE_ITEM_SELECT} WHERE {} ORDER BY s.date, r.schedule_id, r.number",
            conditions.join(" AND ")
        );
        let items = self.store.query_rows(&sql, &params, race_item_from_row)?;
        info!(
            count = items.len(),
            force = window.force,
            "Stage 4 extracted races"
        );
        Ok(items)
    }
}

/// Stage 5: races whose provider Y result page should be ingested.
pub struct Step5Extractor {
    store: Store,
}

impl Step5Extractor {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn extract(&self, window: &WorkWindow) -> Result<Vec<RaceItem>> {
        let mut conditions = vec![
            "s.schedule_index IS NOT NULL".to_string(),
            // The provider Y URL needs the cup first day and the race date.
            "s.date != ''".to_string(),
            "c.start_date != ''".to_string(),
        ];
        let mut params: Vec<Value> = Vec::new();

        if let Some(cups) = &window.cup_filter {
            conditions.push(format!("r.cup_id IN ({})", placeholders(1, cups.len())));
            params.extend(cups.iter().cloned().map(Value::Text));
        } else {
            let (start, end) = window.compact_bounds();
            conditions.push(format!(
                "s.date BETWEEN ?{} AND ?{}",
                params.len() + 1,
                params.len() + 2
            ));
            params.push(Value::Text(start));
            params.push(Value::Text(end));
        }

        if !window.force {
            conditions.push(
                "(rs.step5_status IS NULL OR rs.step5_status != 'completed')".to_string(),
            );
        }

        let sql = format!(
            "{RACE_ITEM_SELECT} WHERE {} ORDER BY s.date, r.schedule_id, r.number",
            conditions.join(" AND ")
        );
        let items = self.store.query_rows(&sql, &params, race_item_from_row)?;
        debug!(force = window.force, "Stage 5 query done");
        info!(
            count = items.len(),
            force = window.force,
            "Stage 5 extracted races"
        );
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::models::StepStatus;

    fn window(start: &str, end: &str) -> WorkWindow {
        WorkWindow::new(
            dates::parse_iso_date(start).unwrap(),
            dates::parse_iso_date(end).unwrap(),
        )
    }

    fn store_with_race(
        race_id: &str,
        cup_id: &str,
        date_compact: &str,
        race_status: Option<i64>,
    ) -> Store {
        let store = Store::open_in_memory().unwrap();
        seed_race(&store, race_id, cup_id, date_compact, race_status);
        store
    }

    fn seed_race(
        store: &Store,
        race_id: &str,
        cup_id: &str,
        date_compact: &str,
        race_status: Option<i64>,
    ) {
        let now = Store::now();
        let iso = dates::to_iso_str(date_compact);
        store
            .exec(
                "INSERT OR IGNORE INTO venues (venue_id, name, slug, updated_at)
                 VALUES ('v1', 'Hiratsuka', 'hiratsuka', ?1)",
                &[Value::Text(now.clone())],
            )
            .unwrap();
        store
            .exec(
                "INSERT OR IGNORE INTO cups (cup_id, name, start_date, end_date, venue_id, updated_at)
                 VALUES (?1, 'Cup', ?2, ?2, 'v1', ?3)",
                &[
                    Value::Text(cup_id.into()),
                    Value::Text(iso.clone()),
                    Value::Text(now.clone()),
                ],
            )
            .unwrap();
        let schedule_id = format!("{cup_id}-s1");
        store
            .exec(
                "INSERT OR IGNORE INTO schedules (schedule_id, cup_id, date, schedule_index, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4)",
                &[
                    Value::Text(schedule_id.clone()),
                    Value::Text(cup_id.into()),
                    Value::Text(date_compact.into()),
                    Value::Text(now.clone()),
                ],
            )
            .unwrap();
        store
            .exec(
                "INSERT INTO races (race_id, cup_id, schedule_id, number, status, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4, ?5)",
                &[
                    Value::Text(race_id.into()),
                    Value::Text(cup_id.into()),
                    Value::Text(schedule_id),
                    race_status.map(Value::Integer).unwrap_or(Value::Null),
                    Value::Text(now.clone()),
                ],
            )
            .unwrap();
        store
            .exec(
                "INSERT INTO race_status (race_id, step1_status, step2_status, step3_status, step4_status, step5_status, updated_at)
                 VALUES (?1, 'pending', 'pending', 'pending', 'pending', 'pending', ?2)",
                &[Value::Text(race_id.into()), Value::Text(now)],
            )
            .unwrap();
    }

    #[test]
    fn step2_window_overlap_includes_partial_cups() {
        let store = store_with_race("r1", "cup1", "20240610", None);
        let extractor = Step2Extractor::new(store);
        // Cup runs on 2024-06-10; a window ending that day overlaps.
        let cups = extractor.extract(&window("2024-06-05", "2024-06-10")).unwrap();
        assert_eq!(cups, vec!["cup1"]);
        // Disjoint window finds nothing.
        let cups = extractor.extract(&window("2024-07-01", "2024-07-02")).unwrap();
        assert!(cups.is_empty());
    }

    #[test]
    fn step2_skips_fully_ingested_cups_unless_forced() {
        let store = store_with_race("r1", "cup1", "20240610", None);
        store
            .set_step_status("r1", 3, StepStatus::Completed)
            .unwrap();
        let extractor = Step2Extractor::new(store);
        let w = window("2024-06-01", "2024-06-30");
        assert!(extractor.extract(&w).unwrap().is_empty());
        assert_eq!(
            extractor.extract(&w.clone().with_force(true)).unwrap(),
            vec!["cup1"]
        );
    }

    #[test]
    fn step3_excludes_completed_and_null_index() {
        let store = store_with_race("r1", "cup1", "20240610", None);
        seed_race(&store, "r2", "cup1", "20240610", None);
        store
            .set_step_status("r2", 3, StepStatus::Completed)
            .unwrap();
        let extractor = Step3Extractor::new(store.clone());
        let w = window("2024-06-01", "2024-06-30");

        let items = extractor.extract(&w).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].race_id, "r1");
        assert_eq!(items[0].schedule_index, 1);
        assert_eq!(items[0].cup_start_date, "20240610");
        assert_eq!(items[0].venue_slug, "hiratsuka");

        // Forcing brings the completed race back.
        assert_eq!(extractor.extract(&w.clone().with_force(true)).unwrap().len(), 2);

        // A schedule without an index never yields work.
        store
            .exec(
                "UPDATE schedules SET schedule_index = NULL WHERE cup_id = 'cup1'",
                &[],
            )
            .unwrap();
        assert!(extractor.extract(&w.with_force(true)).unwrap().is_empty());
    }

    #[test]
    fn step4_post_finish_refresh_requires_odds_status() {
        let store = store_with_race("r1", "cup1", "20240610", Some(RACE_STATUS_FINISHED));
        let extractor = Step4Extractor::new(store.clone());
        let w = window("2024-06-01", "2024-06-30");

        // Finished race without odds history: skipped.
        assert!(extractor.extract(&w).unwrap().is_empty());

        // One pre-finish snapshot recorded: eligible again for the final
        // board.
        store
            .exec(
                "INSERT INTO odds_status (race_id, fetched_at) VALUES ('r1', ?1)",
                &[Value::Text(Store::now())],
            )
            .unwrap();
        let items = extractor.extract(&w).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].race_status, Some(RACE_STATUS_FINISHED));
    }

    #[test]
    fn step4_unfinished_race_always_eligible() {
        let store = store_with_race("r1", "cup1", "20240610", Some(1));
        let extractor = Step4Extractor::new(store);
        let items = extractor
            .extract(&window("2024-06-01", "2024-06-30"))
            .unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn step5_skips_completed() {
        let store = store_with_race("r1", "cup1", "20240610", Some(RACE_STATUS_FINISHED));
        let extractor = Step5Extractor::new(store.clone());
        let w = window("2024-06-01", "2024-06-30");
        assert_eq!(extractor.extract(&w).unwrap().len(), 1);

        store
            .set_step_status("r1", 5, StepStatus::Completed)
            .unwrap();
        assert!(extractor.extract(&w).unwrap().is_empty());
        assert_eq!(extractor.extract(&w.with_force(true)).unwrap().len(), 1);
    }

    #[test]
    fn cup_filter_overrides_window() {
        let store = store_with_race("r1", "cup1", "20240610", None);
        seed_race(&store, "r2", "cup2", "20240801", None);
        let extractor = Step3Extractor::new(store);
        // Window matches neither, but the filter names cup2.
        let w = window("2025-01-01", "2025-01-02").with_cups(vec!["cup2".into()]);
        let items = extractor.extract(&w).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].cup_id, "cup2");
    }
}
