//! Domain rows and identifiers shared across the pipeline.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-step ledger state for a race.
///
/// The ledger drives the incremental extractors; transitions are
/// `pending -> processing -> {completed, pending, error}` with a forced
/// re-run moving `completed` back to `processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Processing => "processing",
            StepStatus::Completed => "completed",
            StepStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<StepStatus> {
        match s {
            "pending" => Some(StepStatus::Pending),
            "processing" => Some(StepStatus::Processing),
            "completed" => Some(StepStatus::Completed),
            "error" => Some(StepStatus::Error),
            _ => None,
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Race `status` value meaning the race has finished and results are final.
pub const RACE_STATUS_FINISHED: i64 = 3;

/// Intermediate race identifier `{cup_id}_{schedule_index}_{number}`.
///
/// The canonical key is the store's `race_id`; this underscore-joined form
/// shows up in work queues and logs because it carries everything the
/// provider W race URL needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceKey {
    pub cup_id: String,
    pub schedule_index: i64,
    pub number: i64,
}

impl RaceKey {
    pub fn parse(s: &str) -> Result<RaceKey> {
        let mut parts = s.rsplitn(3, '_');
        let number = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| anyhow!("race key missing number: {s}"))?;
        let schedule_index = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| anyhow!("race key missing schedule index: {s}"))?;
        let cup_id = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| anyhow!("race key missing cup id: {s}"))?
            .to_string();
        Ok(RaceKey {
            cup_id,
            schedule_index,
            number,
        })
    }
}

impl fmt::Display for RaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.cup_id, self.schedule_index, self.number)
    }
}

/// One unit of stage-3/4/5 work, as produced by the extractors.
#[derive(Debug, Clone)]
pub struct RaceItem {
    pub race_id: String,
    pub cup_id: String,
    pub schedule_id: String,
    /// 1-based position of the schedule within the cup; the provider W
    /// race URL takes this, never `schedule_id`.
    pub schedule_index: i64,
    pub number: i64,
    pub venue_id: String,
    /// Race day, `YYYYMMDD`.
    pub date: String,
    /// First day of the cup, `YYYYMMDD`. Needed for the provider Y URL.
    pub cup_start_date: String,
    /// Venue slug, the bridge to the provider Y venue code. Only stage 5
    /// consumes it.
    pub venue_slug: String,
    pub race_status: Option<i64>,
}

impl RaceItem {
    pub fn key(&self) -> RaceKey {
        RaceKey {
            cup_id: self.cup_id.clone(),
            schedule_index: self.schedule_index,
            number: self.number,
        }
    }
}

/// Result of one stage run: `ok` is true iff zero per-item errors.
#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome {
    pub ok: bool,
    pub message: String,
    pub count: u64,
}

impl StageOutcome {
    pub fn ok(message: impl Into<String>, count: u64) -> Self {
        StageOutcome {
            ok: true,
            message: message.into(),
            count,
        }
    }

    pub fn failed(message: impl Into<String>, count: u64) -> Self {
        StageOutcome {
            ok: false,
            message: message.into(),
            count,
        }
    }
}

/// The bet types carried by the odds snapshot, one store table each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OddsKind {
    Trifecta,
    Trio,
    Exacta,
    Quinella,
    QuinellaPlace,
    BracketQuinella,
    BracketExacta,
    Win,
}

impl OddsKind {
    pub const ALL: [OddsKind; 8] = [
        OddsKind::Trifecta,
        OddsKind::Trio,
        OddsKind::Exacta,
        OddsKind::Quinella,
        OddsKind::QuinellaPlace,
        OddsKind::BracketQuinella,
        OddsKind::BracketExacta,
        OddsKind::Win,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            OddsKind::Trifecta => "odds_trifecta",
            OddsKind::Trio => "odds_trio",
            OddsKind::Exacta => "odds_exacta",
            OddsKind::Quinella => "odds_quinella",
            OddsKind::QuinellaPlace => "odds_quinella_place",
            OddsKind::BracketQuinella => "odds_bracket_quinella",
            OddsKind::BracketExacta => "odds_bracket_exacta",
            OddsKind::Win => "odds_win",
        }
    }
}

/// One odds row ready for the store, shared by all eight tables.
#[derive(Debug, Clone)]
pub struct OddsRow {
    pub key: String,
    pub odds: f64,
    pub min_odds: f64,
    pub max_odds: f64,
    pub popularity: i64,
    pub is_absent: bool,
}

/// Fixed bet unit: every odds value is quoted against a 100-yen stake.
pub const ODDS_UNIT_PRICE: i64 = 100;

impl OddsRow {
    /// Expected payout on the fixed unit stake.
    pub fn payoff_price(&self) -> i64 {
        (self.odds * ODDS_UNIT_PRICE as f64).round() as i64
    }
}

/// One finisher row from the provider Y result table.
#[derive(Debug, Clone, Default)]
pub struct ResultRow {
    pub rank: i64,
    pub frame: i64,
    pub player_id: Option<String>,
    pub player_name: String,
    pub age: Option<i64>,
    pub prefecture: Option<String>,
    pub term: Option<String>,
    pub class: Option<String>,
    pub margin: Option<String>,
    pub last_lap_time: Option<String>,
    pub winning_move: Option<String>,
}

/// One payout row from the provider Y payouts table.
#[derive(Debug, Clone)]
pub struct PayoutRow {
    pub ticket_type: String,
    pub combination: String,
    pub amount: i64,
    pub popularity: i64,
}

/// One rider position in one section of the lap grid.
#[derive(Debug, Clone)]
pub struct LapPositionRow {
    pub section: String,
    pub frame: i64,
    pub player_name: String,
    pub x: i64,
    pub y: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn race_key_round_trip() {
        let key = RaceKey::parse("2024101234_3_11").unwrap();
        assert_eq!(key.cup_id, "2024101234");
        assert_eq!(key.schedule_index, 3);
        assert_eq!(key.number, 11);
        assert_eq!(key.to_string(), "2024101234_3_11");
    }

    #[test]
    fn race_key_cup_id_may_contain_underscores() {
        let key = RaceKey::parse("cup_extra_2_7").unwrap();
        assert_eq!(key.cup_id, "cup_extra");
        assert_eq!(key.schedule_index, 2);
        assert_eq!(key.number, 7);
    }

    #[test]
    fn race_key_rejects_garbage() {
        assert!(RaceKey::parse("no-underscores").is_err());
        assert!(RaceKey::parse("cup_x_y").is_err());
        assert!(RaceKey::parse("_1_2").is_err());
    }

    #[test]
    fn step_status_string_round_trip() {
        for status in [
            StepStatus::Pending,
            StepStatus::Processing,
            StepStatus::Completed,
            StepStatus::Error,
        ] {
            assert_eq!(StepStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(StepStatus::parse("done"), None);
    }

    #[test]
    fn payoff_follows_unit_price() {
        let row = OddsRow {
            key: "1-2".into(),
            odds: 12.3,
            min_odds: 11.0,
            max_odds: 13.1,
            popularity: 4,
            is_absent: false,
        };
        assert_eq!(row.payoff_price(), 1230);
    }
}
