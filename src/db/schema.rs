//! Store schema.
//!
//! One table per entity; composite keys where the entity is keyed by more
//! than its race. `race_status` and `odds_status` form the ledger that
//! drives incremental runs. Lock order for multi-table transactions:
//! cups -> schedules -> races -> race_status -> odds_*.

/// Schema DDL, executed as one batch on open.
pub const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS regions (
    region_id   TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    updated_at  TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS venues (
    venue_id                TEXT PRIMARY KEY,
    name                    TEXT NOT NULL,
    short_name              TEXT NOT NULL DEFAULT '',
    slug                    TEXT NOT NULL DEFAULT '',
    address                 TEXT NOT NULL DEFAULT '',
    phone_number            TEXT NOT NULL DEFAULT '',
    region_id               TEXT NOT NULL DEFAULT '',
    website_url             TEXT NOT NULL DEFAULT '',
    twitter_account_id      TEXT NOT NULL DEFAULT '',
    track_distance          INTEGER NOT NULL DEFAULT 0,
    bank_feature            TEXT NOT NULL DEFAULT '',
    best_record_player_id   TEXT,
    best_record_seconds     REAL,
    best_record_date        TEXT,
    updated_at              TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS cups (
    cup_id          TEXT PRIMARY KEY,
    name            TEXT NOT NULL,
    start_date      TEXT NOT NULL,
    end_date        TEXT NOT NULL,
    duration        INTEGER NOT NULL DEFAULT 0,
    grade           INTEGER NOT NULL DEFAULT 0,
    venue_id        TEXT NOT NULL DEFAULT '',
    labels          TEXT NOT NULL DEFAULT '',
    players_unfixed INTEGER NOT NULL DEFAULT 0,
    updated_at      TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_cups_dates ON cups(start_date, end_date);

CREATE TABLE IF NOT EXISTS schedules (
    schedule_id     TEXT PRIMARY KEY,
    cup_id          TEXT NOT NULL,
    date            TEXT NOT NULL,
    schedule_index  INTEGER,
    entries_unfixed INTEGER NOT NULL DEFAULT 0,
    updated_at      TEXT NOT NULL,
    UNIQUE (cup_id, schedule_index)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_schedules_date ON schedules(date);

CREATE TABLE IF NOT EXISTS races (
    race_id        TEXT PRIMARY KEY,
    cup_id         TEXT NOT NULL,
    schedule_id    TEXT NOT NULL,
    number         INTEGER NOT NULL,
    name           TEXT NOT NULL DEFAULT '',
    race_type      TEXT NOT NULL DEFAULT '',
    distance       INTEGER NOT NULL DEFAULT 0,
    lap            INTEGER NOT NULL DEFAULT 0,
    entries_number INTEGER NOT NULL DEFAULT 0,
    is_grade_race  INTEGER NOT NULL DEFAULT 0,
    status         INTEGER,
    cancel         INTEGER NOT NULL DEFAULT 0,
    cancel_reason  TEXT NOT NULL DEFAULT '',
    start_at       INTEGER NOT NULL DEFAULT 0,
    close_at       INTEGER NOT NULL DEFAULT 0,
    decided_at     INTEGER NOT NULL DEFAULT 0,
    weather        TEXT NOT NULL DEFAULT '',
    wind_speed     REAL NOT NULL DEFAULT 0,
    updated_at     TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_races_schedule ON races(schedule_id, number);
CREATE INDEX IF NOT EXISTS idx_races_cup ON races(cup_id);

CREATE TABLE IF NOT EXISTS entries (
    race_id     TEXT NOT NULL,
    frame       INTEGER NOT NULL,
    player_id   TEXT NOT NULL DEFAULT '',
    name        TEXT NOT NULL DEFAULT '',
    is_absent   INTEGER NOT NULL DEFAULT 0,
    style       TEXT NOT NULL DEFAULT '',
    race_point  REAL NOT NULL DEFAULT 0,
    first_rate  REAL NOT NULL DEFAULT 0,
    second_rate REAL NOT NULL DEFAULT 0,
    third_rate  REAL NOT NULL DEFAULT 0,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (race_id, frame)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS players (
    player_id   TEXT PRIMARY KEY,
    name        TEXT NOT NULL DEFAULT '',
    yomi        TEXT NOT NULL DEFAULT '',
    birthday    TEXT NOT NULL DEFAULT '',
    age         INTEGER NOT NULL DEFAULT 0,
    prefecture  TEXT NOT NULL DEFAULT '',
    term        TEXT NOT NULL DEFAULT '',
    class       TEXT NOT NULL DEFAULT '',
    updated_at  TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS line_predictions (
    race_id        TEXT PRIMARY KEY,
    line_type      TEXT NOT NULL DEFAULT '',
    line_formation TEXT NOT NULL DEFAULT '',
    updated_at     TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS results (
    race_id       TEXT NOT NULL,
    rank          INTEGER NOT NULL,
    frame         INTEGER NOT NULL,
    player_id     TEXT,
    player_name   TEXT NOT NULL DEFAULT '',
    age           INTEGER,
    prefecture    TEXT,
    term          TEXT,
    class         TEXT,
    margin        TEXT,
    last_lap_time TEXT,
    winning_move  TEXT,
    updated_at    TEXT NOT NULL,
    PRIMARY KEY (race_id, rank)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS payouts (
    race_id     TEXT NOT NULL,
    ticket_type TEXT NOT NULL,
    combination TEXT NOT NULL,
    amount      INTEGER NOT NULL,
    popularity  INTEGER NOT NULL DEFAULT 0,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (race_id, ticket_type, combination)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS lap_positions (
    race_id     TEXT NOT NULL,
    section     TEXT NOT NULL,
    frame       INTEGER NOT NULL,
    player_name TEXT NOT NULL DEFAULT '',
    x           INTEGER NOT NULL,
    y           INTEGER NOT NULL,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (race_id, section, frame)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS race_status (
    race_id      TEXT PRIMARY KEY,
    step1_status TEXT,
    step2_status TEXT,
    step3_status TEXT,
    step4_status TEXT,
    step5_status TEXT,
    updated_at   TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS odds_status (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    race_id       TEXT NOT NULL,
    fetched_at    TEXT NOT NULL,
    is_final      INTEGER NOT NULL DEFAULT 0,
    payout_status TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_odds_status_race ON odds_status(race_id);
"#;

/// The eight per-bet-type odds tables share one layout.
pub fn odds_table_ddl(table: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    race_id      TEXT NOT NULL,
    key          TEXT NOT NULL,
    odds         REAL NOT NULL,
    min_odds     REAL NOT NULL,
    max_odds     REAL NOT NULL,
    unit_price   INTEGER NOT NULL DEFAULT 100,
    payoff_price INTEGER NOT NULL DEFAULT 0,
    popularity   INTEGER NOT NULL DEFAULT 0,
    is_absent    INTEGER NOT NULL DEFAULT 0,
    updated_at   TEXT NOT NULL,
    PRIMARY KEY (race_id, key)
) WITHOUT ROWID;
"#
    )
}
