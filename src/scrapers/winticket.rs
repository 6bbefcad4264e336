//! Provider W (winticket) JSON API client.
//!
//! Four GET endpoints, no auth beyond browser-shaped headers. The per-race
//! endpoints take the schedule's 1-based *position* within the cup
//! (`schedule_index`), not the schedule's own id; the id is only a local
//! join key.

use crate::cancel::CancelFlag;
use crate::models::{OddsKind, OddsRow};
use crate::ratelimit::RateLimiter;
use crate::scrapers::http::{FetchError, HostClient, RetryPolicy};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ORIGIN, REFERER, USER_AGENT};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub const WINTICKET_BASE_URL: &str = "https://api.winticket.jp";

const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Endpoint classes for the rate limiter, one per endpoint family.
pub mod classes {
    pub const GET_CUPS: &str = "winticket.get_cups";
    pub const GET_CUP_DETAIL: &str = "winticket.get_cup_detail";
    pub const GET_RACE_DETAIL: &str = "winticket.get_race_detail";
    pub const GET_ODDS: &str = "winticket.get_odds";
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegionDto {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BestRecordDto {
    #[serde(default)]
    pub player_id: String,
    #[serde(default)]
    pub second: f64,
    #[serde(default)]
    pub date: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VenueDto {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "name1")]
    pub short_name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub region_id: String,
    #[serde(default)]
    pub website_url: String,
    #[serde(default)]
    pub twitter_account_id: String,
    #[serde(default)]
    pub track_distance: i64,
    #[serde(default)]
    pub bank_feature: String,
    #[serde(default)]
    pub best_record: Option<BestRecordDto>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CupDto {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub end_date: String,
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub grade: i64,
    #[serde(default)]
    pub venue_id: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub players_unfixed: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthBundle {
    #[serde(default)]
    pub cups: Vec<CupDto>,
    #[serde(default)]
    pub venues: Vec<VenueDto>,
    #[serde(default)]
    pub regions: Vec<RegionDto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonthResponse {
    pub month: MonthBundle,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleDto {
    pub id: String,
    #[serde(default)]
    pub date: String,
    /// 1-based day ordinal within the cup; this is the race-URL parameter.
    #[serde(default)]
    pub index: i64,
    #[serde(default)]
    pub entries_unfixed: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceDto {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub schedule_id: String,
    #[serde(default)]
    pub number: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub race_type: String,
    #[serde(default)]
    pub distance: i64,
    #[serde(default)]
    pub lap: i64,
    #[serde(default)]
    pub entries_number: i64,
    #[serde(default)]
    pub is_grade_race: bool,
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub cancel: bool,
    #[serde(default)]
    pub cancel_reason: String,
    #[serde(default)]
    pub start_at: i64,
    #[serde(default)]
    pub close_at: i64,
    #[serde(default)]
    pub decided_at: i64,
    #[serde(default)]
    pub weather: String,
    #[serde(default)]
    pub wind_speed: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CupDetailResponse {
    #[serde(default)]
    pub cup: Option<CupDto>,
    #[serde(default)]
    pub schedules: Vec<ScheduleDto>,
    #[serde(default)]
    pub races: Vec<RaceDto>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryDto {
    /// Frame (car) number within the race.
    #[serde(default)]
    pub number: i64,
    #[serde(default)]
    pub player_id: String,
    #[serde(default)]
    pub absent: bool,
    #[serde(default)]
    pub bracket_number: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerDto {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub yomi: String,
    #[serde(default)]
    pub birthday: String,
    #[serde(default)]
    pub age: i64,
    #[serde(default)]
    pub prefecture: String,
    #[serde(default)]
    pub term: String,
    #[serde(default)]
    pub class: String,
}

/// Rolling performance record for one rider; joined onto the entry row.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDto {
    #[serde(default)]
    pub player_id: String,
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub race_point: f64,
    #[serde(default)]
    pub first_rate: f64,
    #[serde(default)]
    pub second_rate: f64,
    #[serde(default)]
    pub third_rate: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinePredictionDto {
    #[serde(default)]
    pub line_type: String,
    #[serde(default)]
    pub line_formation: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceDetailResponse {
    #[serde(default)]
    pub race: Option<RaceDto>,
    #[serde(default)]
    pub entries: Vec<EntryDto>,
    #[serde(default)]
    pub players: Vec<PlayerDto>,
    #[serde(default)]
    pub records: Vec<RecordDto>,
    #[serde(default)]
    pub line_prediction: Option<LinePredictionDto>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OddsItemDto {
    #[serde(default)]
    pub number1: i64,
    #[serde(default)]
    pub number2: i64,
    #[serde(default)]
    pub number3: i64,
    #[serde(default)]
    pub bracket1: i64,
    #[serde(default)]
    pub bracket2: i64,
    #[serde(default)]
    pub odds: f64,
    #[serde(default)]
    pub min_odds: f64,
    #[serde(default)]
    pub max_odds: f64,
    #[serde(default)]
    pub popularity_order: i64,
    #[serde(default)]
    pub is_absent: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OddsBundleDto {
    #[serde(default)]
    pub trifecta: Vec<OddsItemDto>,
    #[serde(default)]
    pub trio: Vec<OddsItemDto>,
    #[serde(default)]
    pub exacta: Vec<OddsItemDto>,
    #[serde(default)]
    pub quinella: Vec<OddsItemDto>,
    #[serde(default)]
    pub quinella_place: Vec<OddsItemDto>,
    #[serde(default)]
    pub bracket_quinella: Vec<OddsItemDto>,
    #[serde(default)]
    pub bracket_exacta: Vec<OddsItemDto>,
    #[serde(default)]
    pub win: Vec<OddsItemDto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OddsResponse {
    #[serde(default)]
    pub odds: OddsBundleDto,
}

impl OddsItemDto {
    fn combination_key(&self, kind: OddsKind) -> String {
        match kind {
            OddsKind::Trifecta | OddsKind::Trio => {
                format!("{}-{}-{}", self.number1, self.number2, self.number3)
            }
            OddsKind::Exacta | OddsKind::Quinella | OddsKind::QuinellaPlace => {
                format!("{}-{}", self.number1, self.number2)
            }
            OddsKind::BracketQuinella | OddsKind::BracketExacta => {
                format!("{}-{}", self.bracket1, self.bracket2)
            }
            OddsKind::Win => self.number1.to_string(),
        }
    }

    fn to_row(&self, kind: OddsKind) -> OddsRow {
        // odds == 0 means the combination is void (a scratched rider);
        // keep the row as an absent marker so the snapshot stays complete.
        let absent = self.is_absent || self.odds == 0.0;
        let min = if self.min_odds > 0.0 {
            self.min_odds
        } else {
            self.odds
        };
        let max = if self.max_odds > 0.0 {
            self.max_odds
        } else {
            self.odds
        };
        OddsRow {
            key: self.combination_key(kind),
            odds: self.odds,
            min_odds: min,
            max_odds: max,
            popularity: self.popularity_order,
            is_absent: absent,
        }
    }
}

impl OddsBundleDto {
    /// Flatten the bundle into per-table row sets.
    pub fn rows(&self) -> Vec<(OddsKind, Vec<OddsRow>)> {
        OddsKind::ALL
            .iter()
            .map(|&kind| {
                let items = match kind {
                    OddsKind::Trifecta => &self.trifecta,
                    OddsKind::Trio => &self.trio,
                    OddsKind::Exacta => &self.exacta,
                    OddsKind::Quinella => &self.quinella,
                    OddsKind::QuinellaPlace => &self.quinella_place,
                    OddsKind::BracketQuinella => &self.bracket_quinella,
                    OddsKind::BracketExacta => &self.bracket_exacta,
                    OddsKind::Win => &self.win,
                };
                (kind, items.iter().map(|i| i.to_row(kind)).collect())
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.trifecta.is_empty()
            && self.trio.is_empty()
            && self.exacta.is_empty()
            && self.quinella.is_empty()
            && self.quinella_place.is_empty()
            && self.bracket_quinella.is_empty()
            && self.bracket_exacta.is_empty()
            && self.win.is_empty()
    }
}

pub struct WinticketClient {
    http: HostClient,
    base_url: String,
}

impl WinticketClient {
    pub fn new(
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
        timeout: Duration,
        cancel: CancelFlag,
    ) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(DESKTOP_UA));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(
            REFERER,
            HeaderValue::from_static("https://keirin.winticket.jp/"),
        );
        headers.insert(
            ORIGIN,
            HeaderValue::from_static("https://keirin.winticket.jp"),
        );
        let http = HostClient::new(headers, timeout, limiter, policy, cancel)?;
        Ok(Self {
            http,
            base_url: WINTICKET_BASE_URL.to_string(),
        })
    }

    pub fn monthly_cups_url(&self, month_compact: &str) -> String {
        format!(
            "{}/v1/keirin/cups?date={}&fields=month,venues,regions&pfm=web",
            self.base_url, month_compact
        )
    }

    pub fn cup_detail_url(&self, cup_id: &str) -> String {
        format!(
            "{}/v1/keirin/cups/{}?fields=cup,schedules,races&pfm=web",
            self.base_url, cup_id
        )
    }

    pub fn race_detail_url(&self, cup_id: &str, schedule_index: i64, number: i64) -> String {
        format!(
            "{}/v1/keirin/cups/{}/schedules/{}/races/{}?fields=race,entries,players,records,linePrediction&pfm=web",
            self.base_url, cup_id, schedule_index, number
        )
    }

    pub fn race_odds_url(&self, cup_id: &str, schedule_index: i64, number: i64) -> String {
        format!(
            "{}/v1/keirin/cups/{}/schedules/{}/races/{}/odds?fields=odds&pfm=web",
            self.base_url, cup_id, schedule_index, number
        )
    }

    /// All cups, venues and regions for the month containing `month_compact`
    /// (a `YYYYMM01` date).
    pub async fn monthly_cups(&self, month_compact: &str) -> Result<MonthResponse, FetchError> {
        self.http
            .fetch_json(&self.monthly_cups_url(month_compact), classes::GET_CUPS)
            .await
    }

    /// Cup header plus its ordered schedules and race index.
    pub async fn cup_detail(&self, cup_id: &str) -> Result<CupDetailResponse, FetchError> {
        self.http
            .fetch_json(&self.cup_detail_url(cup_id), classes::GET_CUP_DETAIL)
            .await
    }

    pub async fn race_detail(
        &self,
        cup_id: &str,
        schedule_index: i64,
        number: i64,
    ) -> Result<RaceDetailResponse, FetchError> {
        self.http
            .fetch_json(
                &self.race_detail_url(cup_id, schedule_index, number),
                classes::GET_RACE_DETAIL,
            )
            .await
    }

    pub async fn race_odds(
        &self,
        cup_id: &str,
        schedule_index: i64,
        number: i64,
    ) -> Result<OddsResponse, FetchError> {
        self.http
            .fetch_json(
                &self.race_odds_url(cup_id, schedule_index, number),
                classes::GET_ODDS,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> WinticketClient {
        let limiter = Arc::new(RateLimiter::new(0.0));
        WinticketClient::new(
            limiter,
            RetryPolicy::default(),
            Duration::from_secs(30),
            CancelFlag::new(),
        )
        .unwrap()
    }

    #[test]
    fn urls_use_schedule_index_not_id() {
        let client = test_client();
        assert_eq!(
            client.race_detail_url("2024cup", 2, 11),
            "https://api.winticket.jp/v1/keirin/cups/2024cup/schedules/2/races/11?fields=race,entries,players,records,linePrediction&pfm=web"
        );
        assert_eq!(
            client.race_odds_url("2024cup", 2, 11),
            "https://api.winticket.jp/v1/keirin/cups/2024cup/schedules/2/races/11/odds?fields=odds&pfm=web"
        );
        assert!(client
            .monthly_cups_url("20240601")
            .contains("date=20240601&fields=month,venues,regions"));
    }

    #[test]
    fn month_payload_decodes() {
        let raw = r#"{
            "month": {
                "cups": [{"id":"c1","name":"Cup","startDate":"2024-06-01","endDate":"2024-06-03","duration":3,"grade":2,"venueId":"v1","labels":["F1"],"playersUnfixed":false}],
                "venues": [{"id":"v1","name":"Venue","name1":"Vn","slug":"venue","regionId":"r1","trackDistance":400,"bankFeature":"standard","bestRecord":{"playerId":"p1","second":10.5,"date":"2020-01-01"}}],
                "regions": [{"id":"r1","name":"Kanto"}]
            }
        }"#;
        let parsed: MonthResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.month.cups.len(), 1);
        assert_eq!(parsed.month.venues[0].track_distance, 400);
        assert_eq!(
            parsed.month.venues[0].best_record.as_ref().unwrap().second,
            10.5
        );
    }

    #[test]
    fn odds_bundle_rows_cover_all_kinds() {
        let raw = r#"{
            "odds": {
                "trifecta": [{"number1":1,"number2":2,"number3":3,"odds":45.2,"minOdds":40.0,"maxOdds":50.1,"popularityOrder":7}],
                "win": [{"number1":4,"odds":2.1,"popularityOrder":1}],
                "bracketQuinella": [{"bracket1":1,"bracket2":2,"odds":5.0,"popularityOrder":2}]
            }
        }"#;
        let parsed: OddsResponse = serde_json::from_str(raw).unwrap();
        let rows = parsed.odds.rows();
        assert_eq!(rows.len(), OddsKind::ALL.len());
        let trifecta = &rows
            .iter()
            .find(|(k, _)| *k == OddsKind::Trifecta)
            .unwrap()
            .1;
        assert_eq!(trifecta[0].key, "1-2-3");
        assert_eq!(trifecta[0].min_odds, 40.0);
        let win = &rows.iter().find(|(k, _)| *k == OddsKind::Win).unwrap().1;
        assert_eq!(win[0].key, "4");
        // min/max default to the quoted odds when the feed omits them.
        assert_eq!(win[0].min_odds, 2.1);
    }

    #[test]
    fn zero_odds_become_absent_markers() {
        let item = OddsItemDto {
            number1: 1,
            number2: 9,
            odds: 0.0,
            ..Default::default()
        };
        let row = item.to_row(OddsKind::Quinella);
        assert!(row.is_absent);
        assert_eq!(row.key, "1-9");
    }
}
