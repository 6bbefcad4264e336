//! Store gateway.
//!
//! One shared SQLite connection behind a mutex. All writes funnel through
//! here: parameterized single statements, chunked batch writes with a
//! per-row fallback that isolates bad rows, and retried transactions for
//! busy/locked conflicts. Callers never format timestamps; the gateway
//! stamps rows with its own clock.

pub mod schema;

use crate::cancel::CancelFlag;
use crate::models::{OddsKind, StepStatus};
use anyhow::{Context, Result};
use chrono::Local;
use parking_lot::Mutex;
use rand::Rng;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, ErrorCode, OpenFlags, Transaction};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Transactions hitting a busy/locked database are retried this many times.
const TX_RETRIES: u32 = 3;
const TX_RETRY_BASE_SECS: f64 = 0.5;

pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    batch_size: usize,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Store> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .with_context(|| format!("Failed to open store {}", path.as_ref().display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Store> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Store> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(schema::SCHEMA_SQL)
            .context("Failed to apply base schema")?;
        for kind in OddsKind::ALL {
            conn.execute_batch(&schema::odds_table_ddl(kind.table()))
                .with_context(|| format!("Failed to create {}", kind.table()))?;
        }
        Ok(Store {
            conn: Arc::new(Mutex::new(conn)),
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Store {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Gateway clock; every row timestamp comes from here.
    pub fn now() -> String {
        Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
    }

    pub fn exec(&self, sql: &str, params: &[Value]) -> Result<usize> {
        let conn = self.conn.lock();
        let affected = conn
            .execute(sql, params_from_iter(params.iter()))
            .with_context(|| format!("exec failed: {}", sql_head(sql)))?;
        Ok(affected)
    }

    pub fn query_rows<T>(
        &self,
        sql: &str,
        params: &[Value],
        mut map: impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(sql)
            .with_context(|| format!("prepare failed: {}", sql_head(sql)))?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| map(row))
            .with_context(|| format!("query failed: {}", sql_head(sql)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn query_one<T>(
        &self,
        sql: &str,
        params: &[Value],
        map: impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Option<T>> {
        Ok(self.query_rows(sql, params, map)?.into_iter().next())
    }

    /// Execute `sql` once per parameter row, chunked into transactions of
    /// `batch_size`. A failing chunk falls back to per-row execution so the
    /// good rows land and the bad one is pinpointed in the log; the count
    /// of rows actually written is returned.
    pub fn exec_batch(
        &self,
        sql: &str,
        param_rows: &[Vec<Value>],
        cancel: &CancelFlag,
    ) -> Result<usize> {
        if param_rows.is_empty() {
            return Ok(0);
        }

        let mut written = 0usize;
        for chunk in param_rows.chunks(self.batch_size) {
            if cancel.is_cancelled() {
                debug!("Batch write cancelled after {written} rows");
                break;
            }

            let chunk_result = self.in_tx(|tx| {
                let mut stmt = tx.prepare_cached(sql)?;
                for row in chunk {
                    stmt.execute(params_from_iter(row.iter()))?;
                }
                Ok(chunk.len())
            });

            match chunk_result {
                Ok(n) => written += n,
                Err(e) => {
                    warn!(
                        error = %e,
                        rows = chunk.len(),
                        "Chunk write failed, salvaging row by row"
                    );
                    for row in chunk {
                        let row_result = self.in_tx(|tx| {
                            let mut stmt = tx.prepare_cached(sql)?;
                            stmt.execute(params_from_iter(row.iter()))?;
                            Ok(())
                        });
                        match row_result {
                            Ok(()) => written += 1,
                            Err(e) => {
                                warn!(error = %e, row = ?row, "Dropping unwritable row")
                            }
                        }
                    }
                }
            }
        }
        Ok(written)
    }

    /// Run `f` inside a transaction; commit on `Ok`, roll back on `Err`.
    /// Busy/locked conflicts retry the whole transaction with jittered
    /// exponential delay.
    pub fn in_tx<T>(&self, mut f: impl FnMut(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut attempt = 0u32;
        loop {
            let result = {
                let mut conn = self.conn.lock();
                let tx = conn.transaction()?;
                match f(&tx) {
                    Ok(value) => tx.commit().map(|_| value).map_err(anyhow::Error::from),
                    Err(e) => {
                        // Dropping the tx rolls back.
                        Err(e)
                    }
                }
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if is_busy(&e) && attempt < TX_RETRIES => {
                    let delay = TX_RETRY_BASE_SECS * 2f64.powi(attempt as i32);
                    let jitter = rand::thread_rng().gen_range(-0.1..=0.1) * delay;
                    let delay = Duration::from_secs_f64((delay + jitter).max(0.0));
                    attempt += 1;
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Store busy, retrying transaction"
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ------------------------------------------------------------------
    // Ledger helpers
    // ------------------------------------------------------------------

    /// Advance one step column for a race, outside a wider transaction.
    pub fn set_step_status(&self, race_id: &str, step: u8, status: StepStatus) -> Result<()> {
        self.in_tx(|tx| {
            set_step_status_tx(tx, race_id, step, status)?;
            Ok(())
        })
    }

    pub fn step_status(&self, race_id: &str, step: u8) -> Result<Option<StepStatus>> {
        let column = step_column(step)?;
        let sql = format!("SELECT {column} FROM race_status WHERE race_id = ?1");
        let raw: Option<Option<String>> =
            self.query_one(&sql, &[Value::Text(race_id.to_string())], |row| row.get(0))?;
        Ok(raw.flatten().and_then(|s| StepStatus::parse(&s)))
    }
}

/// Ledger write usable from inside a saver transaction, so the status and
/// the data it describes commit together.
pub fn set_step_status_tx(
    tx: &Transaction<'_>,
    race_id: &str,
    step: u8,
    status: StepStatus,
) -> Result<usize> {
    let column = step_column(step)?;
    let sql = format!(
        "UPDATE race_status SET {column} = ?1, updated_at = ?2 WHERE race_id = ?3"
    );
    let affected = tx.execute(
        &sql,
        rusqlite::params![status.as_str(), Store::now(), race_id],
    )?;
    Ok(affected)
}

fn step_column(step: u8) -> Result<&'static str> {
    match step {
        1 => Ok("step1_status"),
        2 => Ok("step2_status"),
        3 => Ok("step3_status"),
        4 => Ok("step4_status"),
        5 => Ok("step5_status"),
        _ => anyhow::bail!("no such pipeline step: {step}"),
    }
}

fn is_busy(e: &anyhow::Error) -> bool {
    e.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<rusqlite::Error>(),
            Some(rusqlite::Error::SqliteFailure(inner, _))
                if inner.code == ErrorCode::DatabaseBusy
                    || inner.code == ErrorCode::DatabaseLocked
        )
    })
}

fn sql_head(sql: &str) -> String {
    sql.chars().take(80).collect()
}
