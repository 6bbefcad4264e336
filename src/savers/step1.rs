//! Stage 1 saver: regions, venues and cups from the monthly bundle.
//!
//! Pure replace-on-conflict upserts keyed by the provider ids; the month
//! endpoint re-sends the full static data every time.

use crate::cancel::CancelFlag;
use crate::dates;
use crate::db::Store;
use crate::scrapers::winticket::MonthBundle;
use anyhow::Result;
use rusqlite::types::Value;
use tracing::{info, warn};

#[derive(Debug, Default, Clone, Copy)]
pub struct Step1Counts {
    pub regions: usize,
    pub venues: usize,
    pub cups: usize,
}

impl Step1Counts {
    pub fn total(&self) -> usize {
        self.regions + self.venues + self.cups
    }
}

pub struct Step1Saver {
    store: Store,
}

impl Step1Saver {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn save_month(&self, bundle: &MonthBundle, cancel: &CancelFlag) -> Result<Step1Counts> {
        let mut counts = Step1Counts::default();
        counts.regions = self.save_regions(bundle, cancel)?;
        counts.venues = self.save_venues(bundle, cancel)?;
        counts.cups = self.save_cups(bundle, cancel)?;
        info!(
            regions = counts.regions,
            venues = counts.venues,
            cups = counts.cups,
            "Saved month bundle"
        );
        Ok(counts)
    }

    fn save_regions(&self, bundle: &MonthBundle, cancel: &CancelFlag) -> Result<usize> {
        let now = Store::now();
        let rows: Vec<Vec<Value>> = bundle
            .regions
            .iter()
            .map(|r| {
                vec![
                    Value::Text(r.id.clone()),
                    Value::Text(r.name.clone()),
                    Value::Text(now.clone()),
                ]
            })
            .collect();
        self.store.exec_batch(
            "INSERT OR REPLACE INTO regions (region_id, name, updated_at) VALUES (?1, ?2, ?3)",
            &rows,
            cancel,
        )
    }

    fn save_venues(&self, bundle: &MonthBundle, cancel: &CancelFlag) -> Result<usize> {
        let now = Store::now();
        let rows: Vec<Vec<Value>> = bundle
            .venues
            .iter()
            .map(|v| {
                let best = v.best_record.as_ref();
                vec![
                    Value::Text(v.id.clone()),
                    Value::Text(v.name.clone()),
                    Value::Text(v.short_name.clone()),
                    Value::Text(v.slug.clone()),
                    Value::Text(v.address.clone()),
                    Value::Text(v.phone_number.clone()),
                    Value::Text(v.region_id.clone()),
                    Value::Text(v.website_url.clone()),
                    Value::Text(v.twitter_account_id.clone()),
                    Value::Integer(v.track_distance),
                    Value::Text(v.bank_feature.clone()),
                    best.map(|b| Value::Text(b.player_id.clone()))
                        .unwrap_or(Value::Null),
                    best.map(|b| Value::Real(b.second)).unwrap_or(Value::Null),
                    best.map(|b| Value::Text(b.date.clone())).unwrap_or(Value::Null),
                    Value::Text(now.clone()),
                ]
            })
            .collect();
        self.store.exec_batch(
            "INSERT OR REPLACE INTO venues (
                venue_id, name, short_name, slug, address, phone_number,
                region_id, website_url, twitter_account_id, track_distance,
                bank_feature, best_record_player_id, best_record_seconds,
                best_record_date, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            &rows,
            cancel,
        )
    }

    fn save_cups(&self, bundle: &MonthBundle, cancel: &CancelFlag) -> Result<usize> {
        let now = Store::now();
        let mut rows: Vec<Vec<Value>> = Vec::with_capacity(bundle.cups.len());
        for cup in &bundle.cups {
            let start = dates::to_iso_str(&cup.start_date);
            let end = dates::to_iso_str(&cup.end_date);
            if start > end {
                warn!(cup_id = %cup.id, %start, %end, "Skipping cup with inverted dates");
                continue;
            }
            rows.push(vec![
                Value::Text(cup.id.clone()),
                Value::Text(cup.name.clone()),
                Value::Text(start),
                Value::Text(end),
                Value::Integer(cup.duration),
                Value::Integer(cup.grade),
                Value::Text(cup.venue_id.clone()),
                Value::Text(cup.labels.join(",")),
                Value::Integer(cup.players_unfixed as i64),
                Value::Text(now.clone()),
            ]);
        }
        self.store.exec_batch(
            "INSERT OR REPLACE INTO cups (
                cup_id, name, start_date, end_date, duration, grade,
                venue_id, labels, players_unfixed, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            &rows,
            cancel,
        )
    }
}
