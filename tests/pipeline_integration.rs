//! End-to-end pipeline tests against an in-memory store.
//!
//! Provider payloads are synthetic JSON/HTML fixtures fed straight to the
//! savers, so everything below the HTTP layer (savers, extractors, the
//! ledger, the coordinator's stage sequencing) runs for real without
//! touching the network.

use keirin_backend::cancel::CancelFlag;
use keirin_backend::config::AppConfig;
use keirin_backend::dates;
use keirin_backend::db::Store;
use keirin_backend::extractors::{Step3Extractor, Step4Extractor, Step5Extractor, WorkWindow};
use keirin_backend::models::{RaceItem, StepStatus};
use keirin_backend::savers::{Step1Saver, Step2Saver, Step3Saver, Step4Saver, Step5Saver};
use keirin_backend::scrapers::winticket::{
    CupDetailResponse, MonthResponse, OddsResponse, RaceDetailResponse,
};
use keirin_backend::scrapers::yenjoy_html::ResultPageParser;
use keirin_backend::service::{StepSpec, UpdateService};
use rusqlite::types::Value;

fn month_response() -> MonthResponse {
    serde_json::from_str(
        r#"{
        "month": {
            "cups": [{"id":"cup1","name":"Hiratsuka F1","startDate":"2024-06-01","endDate":"2024-06-03","duration":3,"grade":3,"venueId":"v35","labels":["F1"],"playersUnfixed":false}],
            "venues": [{"id":"v35","name":"平塚競輪場","slug":"hiratsuka","regionId":"r-kanto","trackDistance":400,"bankFeature":"standard"}],
            "regions": [{"id":"r-kanto","name":"関東"}]
        }
    }"#,
    )
    .unwrap()
}

fn cup_detail() -> CupDetailResponse {
    serde_json::from_str(
        r#"{
        "cup": {"id":"cup1","name":"Hiratsuka F1","startDate":"2024-06-01","endDate":"2024-06-03","venueId":"v35"},
        "schedules": [
            {"id":"sched-a","date":"20240601","index":1},
            {"id":"sched-b","date":"20240602","index":2}
        ],
        "races": [
            {"id":"","scheduleId":"sched-a","number":1,"name":"予選1","status":1},
            {"id":"","scheduleId":"sched-a","number":2,"name":"予選2","status":1},
            {"id":"","scheduleId":"sched-b","number":1,"name":"決勝","status":1}
        ]
    }"#,
    )
    .unwrap()
}

fn race_detail() -> RaceDetailResponse {
    serde_json::from_str(
        r#"{
        "race": {"id":"cup1_1_1","scheduleId":"sched-a","number":1,"name":"予選1","status":3},
        "entries": [
            {"number":1,"playerId":"p1","absent":false},
            {"number":2,"playerId":"p2","absent":false}
        ],
        "players": [
            {"id":"p1","name":"山田 太郎","prefecture":"神奈川","term":"107","class":"S1"},
            {"id":"p2","name":"鈴木 次郎","prefecture":"静岡","term":"98","class":"S2"}
        ],
        "records": [{"playerId":"p1","style":"逃","racePoint":111.0,"firstRate":0.3,"secondRate":0.5,"thirdRate":0.6}],
        "linePrediction": {"lineType":"two","lineFormation":"1-2"}
    }"#,
    )
    .unwrap()
}

fn odds_response() -> OddsResponse {
    serde_json::from_str(
        r#"{
        "odds": {
            "trifecta": [{"number1":1,"number2":2,"number3":3,"odds":45.6,"minOdds":40.1,"maxOdds":50.0,"popularityOrder":3}],
            "quinella": [{"number1":1,"number2":2,"odds":4.5,"popularityOrder":1}],
            "win": [{"number1":1,"odds":1.9,"popularityOrder":1},{"number1":2,"odds":0.0,"isAbsent":true}]
        }
    }"#,
    )
    .unwrap()
}

const RESULT_HTML: &str = r#"
<html><body>
  <div class="raceInfo">
    <span class="raceName">予選1</span><span class="raceNum">1R</span>
    <span class="place">平塚</span>
    <span class="raceCondition">天気:晴 風速:1.5m</span>
  </div>
  <table class="result-table-detail">
    <thead><tr><th>着</th><th>車番</th><th>選手名</th><th>上り</th><th>決まり手</th></tr></thead>
    <tbody>
      <tr><td>1</td><td>1</td><td><a href="/racer/data/014816">山田 太郎</a></td><td>11.2</td><td>逃げ</td></tr>
      <tr><td>2</td><td>2</td><td><a href="/racer/data/013502">鈴木 次郎</a></td><td>11.4</td><td></td></tr>
    </tbody>
  </table>
  <table class="result-pay">
    <tr><td>2車単</td><td>1 - 2 340円 (1)</td></tr>
    <tr><td>ワイド</td><td>1 = 2 120円 (1)</td></tr>
  </table>
  <div class="result-b-hyo-lap-wrapper">
    <div class="b-hyo">
      <table><tr><th class="bg-base-color">周回</th></tr></table>
      <span class="bike-icon-wrapper bikeno-1 x-1 y-1"><span class="racer-nm">山田</span></span>
      <span class="bike-icon-wrapper bikeno-2 x-2 y-1"><span class="racer-nm">鈴木</span></span>
    </div>
  </div>
</body></html>
"#;

fn window() -> WorkWindow {
    WorkWindow::new(
        dates::parse_iso_date("2024-06-01").unwrap(),
        dates::parse_iso_date("2024-06-03").unwrap(),
    )
}

fn count(store: &Store, sql: &str) -> i64 {
    store
        .query_one(sql, &[], |row| row.get::<_, i64>(0))
        .unwrap()
        .unwrap()
}

/// S1 + S2 land the static data, the schedules and the races, and every
/// race gets exactly one pending ledger row.
fn seed_through_step2(store: &Store) {
    let cancel = CancelFlag::new();
    Step1Saver::new(store.clone())
        .save_month(&month_response().month, &cancel)
        .unwrap();
    Step2Saver::new(store.clone())
        .save_cup_detail("cup1", &cup_detail())
        .unwrap();
}

#[test]
fn stages_one_and_two_create_races_with_ledger() {
    let store = Store::open_in_memory().unwrap();
    seed_through_step2(&store);

    assert_eq!(count(&store, "SELECT COUNT(*) FROM cups"), 1);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM schedules"), 2);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM races"), 3);

    // Invariant: exactly one race_status row per race.
    assert_eq!(
        count(
            &store,
            "SELECT COUNT(*) FROM races r JOIN race_status rs ON r.race_id = rs.race_id"
        ),
        3
    );
    assert_eq!(count(&store, "SELECT COUNT(*) FROM race_status"), 3);

    // Invariant: schedule_index unique per cup and ordered with date.
    let pairs: Vec<(String, i64)> = store
        .query_rows(
            "SELECT date, schedule_index FROM schedules ORDER BY date",
            &[],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(pairs, vec![("20240601".into(), 1), ("20240602".into(), 2)]);
}

#[test]
fn step3_work_list_shrinks_as_races_complete() {
    let store = Store::open_in_memory().unwrap();
    seed_through_step2(&store);

    let extractor = Step3Extractor::new(store.clone());
    let items = extractor.extract(&window()).unwrap();
    assert_eq!(items.len(), 3);
    // URL parameters come from the schedule position, not the id.
    assert!(items.iter().all(|i| i.schedule_index == 1 || i.schedule_index == 2));

    let first = items
        .iter()
        .find(|i| i.race_id == "cup1_1_1")
        .expect("derived race id");
    Step3Saver::new(store.clone())
        .save_race_detail(first, &race_detail())
        .unwrap();

    // The completed race drops out of the next incremental run.
    let remaining = extractor.extract(&window()).unwrap();
    assert_eq!(remaining.len(), 2);
    assert!(remaining.iter().all(|i| i.race_id != "cup1_1_1"));

    // A forced run sees all three again.
    let forced = extractor.extract(&window().with_force(true)).unwrap();
    assert_eq!(forced.len(), 3);
}

#[test]
fn step4_snapshot_ledger_and_refresh_rules() {
    let store = Store::open_in_memory().unwrap();
    seed_through_step2(&store);

    let extractor = Step4Extractor::new(store.clone());
    let items = extractor.extract(&window()).unwrap();
    assert_eq!(items.len(), 3);
    let item = items.iter().find(|i| i.race_id == "cup1_1_1").unwrap();

    let saver = Step4Saver::new(store.clone());
    let rows = saver.save_odds(item, &odds_response().odds).unwrap();
    assert_eq!(rows, 4);

    // Invariant: step4 completed implies odds rows exist.
    assert_eq!(
        store.step_status("cup1_1_1", 4).unwrap(),
        Some(StepStatus::Completed)
    );
    assert_eq!(
        count(
            &store,
            "SELECT COUNT(*) FROM odds_trifecta WHERE race_id='cup1_1_1'"
        ),
        1
    );
    // The scratched rider is kept as an absent marker.
    assert_eq!(
        count(
            &store,
            "SELECT COUNT(*) FROM odds_win WHERE race_id='cup1_1_1' AND is_absent=1"
        ),
        1
    );

    // Finish the race: without force it stays eligible only because an
    // odds_status row exists from the pre-finish snapshot.
    store
        .exec("UPDATE races SET status = 3 WHERE race_id='cup1_1_1'", &[])
        .unwrap();
    let again = extractor.extract(&window()).unwrap();
    assert!(again.iter().any(|i| i.race_id == "cup1_1_1"));

    // Drop the odds history: the finished race is now skipped.
    store
        .exec("DELETE FROM odds_status WHERE race_id='cup1_1_1'", &[])
        .unwrap();
    let skipped = extractor.extract(&window()).unwrap();
    assert!(skipped.iter().all(|i| i.race_id != "cup1_1_1"));

    // Re-running the saver replaces the snapshot, never accumulates.
    store
        .exec(
            "INSERT INTO odds_status (race_id, fetched_at) VALUES ('cup1_1_1', ?1)",
            &[Value::Text(Store::now())],
        )
        .unwrap();
    saver.save_odds(item, &odds_response().odds).unwrap();
    assert_eq!(
        count(
            &store,
            "SELECT COUNT(*) FROM odds_quinella WHERE race_id='cup1_1_1'"
        ),
        1
    );
}

#[test]
fn step5_result_page_lands_atomically() {
    let store = Store::open_in_memory().unwrap();
    seed_through_step2(&store);

    let extractor = Step5Extractor::new(store.clone());
    let items = extractor.extract(&window()).unwrap();
    assert_eq!(items.len(), 3);
    let item = items.iter().find(|i| i.race_id == "cup1_1_1").unwrap();
    // The extractor carries everything the provider Y URL needs.
    assert_eq!(item.venue_slug, "hiratsuka");
    assert_eq!(item.cup_start_date, "20240601");
    assert_eq!(item.date, "20240601");

    let page = ResultPageParser::new().unwrap().parse(RESULT_HTML);
    let counts = Step5Saver::new(store.clone())
        .save_result_page(item, &page)
        .unwrap();
    assert_eq!(counts.results, 2);
    assert_eq!(counts.payouts, 2);
    assert_eq!(counts.laps, 2);

    // Invariant: results, payouts and lap positions all present (the
    // all-or-nothing failure side is covered by the saver unit tests).
    assert_eq!(
        count(&store, "SELECT COUNT(*) FROM results WHERE race_id='cup1_1_1'"),
        2
    );
    assert_eq!(
        count(&store, "SELECT COUNT(*) FROM payouts WHERE race_id='cup1_1_1'"),
        2
    );
    assert_eq!(
        count(
            &store,
            "SELECT COUNT(*) FROM lap_positions WHERE race_id='cup1_1_1'"
        ),
        2
    );

    // Completed race leaves the stage-5 work list.
    let remaining = extractor.extract(&window()).unwrap();
    assert_eq!(remaining.len(), 2);
}

#[test]
fn idempotent_rerun_produces_identical_state() {
    let store = Store::open_in_memory().unwrap();
    seed_through_step2(&store);
    // Run the whole S2 save again: same rows, same ledger.
    Step2Saver::new(store.clone())
        .save_cup_detail("cup1", &cup_detail())
        .unwrap();
    assert_eq!(count(&store, "SELECT COUNT(*) FROM races"), 3);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM race_status"), 3);
    assert_eq!(
        count(
            &store,
            "SELECT COUNT(*) FROM race_status WHERE step3_status='pending'"
        ),
        3
    );
}

#[tokio::test]
async fn empty_window_run_is_a_clean_noop() {
    let store = Store::open_in_memory().unwrap();
    let config = AppConfig::default();
    let service = UpdateService::new(&config, store).unwrap();

    // Stage 1 is excluded because it would hit the network even for an
    // empty store; stages 2..5 extract nothing and return clean zeros.
    let steps: Vec<StepSpec> = vec![2u8.into(), 3u8.into(), 4u8.into(), 5u8.into()];
    let start = dates::parse_iso_date("2099-01-01").unwrap();
    let (ok, report) = service.run_period(start, start, &steps, None, false).await;

    assert!(ok);
    assert_eq!(report.steps.len(), 4);
    for (step, outcome) in &report.steps {
        assert!(outcome.ok, "step {step} not ok: {}", outcome.message);
        assert_eq!(outcome.count, 0, "step {step} touched data");
    }
}

#[tokio::test]
async fn invalid_step_selection_fails_the_run() {
    let store = Store::open_in_memory().unwrap();
    let service = UpdateService::new(&AppConfig::default(), store).unwrap();
    let start = dates::parse_iso_date("2099-01-01").unwrap();
    let (ok, report) = service
        .run_period(start, start, &[StepSpec::from("stepX")], None, false)
        .await;
    assert!(!ok);
    assert!(report.error.is_some());
}

#[test]
fn race_items_expose_the_underscore_key() {
    let item = RaceItem {
        race_id: "cup1_1_1".into(),
        cup_id: "cup1".into(),
        schedule_id: "sched-a".into(),
        schedule_index: 1,
        number: 1,
        venue_id: "v35".into(),
        date: "20240601".into(),
        cup_start_date: "20240601".into(),
        venue_slug: "hiratsuka".into(),
        race_status: None,
    };
    assert_eq!(item.key().to_string(), "cup1_1_1");
}
