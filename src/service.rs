//! Update coordinator: wires clients, extractors, savers and updaters, and
//! sequences the five stages over a window.

use crate::cancel::CancelFlag;
use crate::config::AppConfig;
use crate::db::Store;
use crate::extractors::WorkWindow;
use crate::models::StageOutcome;
use crate::ratelimit::RateLimiter;
use crate::scrapers::http::RetryPolicy;
use crate::scrapers::winticket::{self, WinticketClient};
use crate::scrapers::yenjoy::{self, YenjoyClient};
use crate::updaters::{Step1Updater, Step2Updater, Step3Updater, Step4Updater, Step5Updater};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::types::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Stages whose failure aborts the remaining window.
const CRITICAL_STEPS: [u8; 3] = [1, 2, 5];

/// A step named on the CLI, in configuration, or over the wire. Both the
/// numeric and the `stepN` spelling are accepted.
#[derive(Debug, Clone)]
pub enum StepSpec {
    Number(u8),
    Name(String),
}

impl From<u8> for StepSpec {
    fn from(n: u8) -> Self {
        StepSpec::Number(n)
    }
}

impl From<&str> for StepSpec {
    fn from(s: &str) -> Self {
        StepSpec::Name(s.to_string())
    }
}

/// Normalize step specs: resolve spellings, drop invalid entries with a
/// warning, dedup, ascending order.
pub fn normalize_steps(specs: &[StepSpec]) -> Vec<u8> {
    let mut steps: Vec<u8> = Vec::new();
    for spec in specs {
        let resolved = match spec {
            StepSpec::Number(n) if (1..=5).contains(n) => Some(*n),
            StepSpec::Number(n) => {
                warn!(step = n, "Ignoring out-of-range step");
                None
            }
            StepSpec::Name(name) => {
                let parsed = name
                    .strip_prefix("step")
                    .unwrap_or(name.as_str())
                    .parse::<u8>()
                    .ok()
                    .filter(|n| (1..=5).contains(n));
                if parsed.is_none() {
                    warn!(step = %name, "Ignoring unparsable step");
                }
                parsed
            }
        };
        if let Some(step) = resolved {
            if !steps.contains(&step) {
                steps.push(step);
            }
        }
    }
    steps.sort_unstable();
    steps
}

/// Per-run report: one outcome per executed step, in step order.
#[derive(Debug, Default)]
pub struct RunReport {
    pub steps: BTreeMap<u8, StageOutcome>,
    pub total_ok: bool,
    pub error: Option<String>,
}

pub struct UpdateService {
    store: Store,
    step1: Step1Updater,
    step2: Step2Updater,
    step3: Step3Updater,
    step4: Step4Updater,
    step5: Step5Updater,
    cancel: CancelFlag,
}

impl UpdateService {
    pub fn new(config: &AppConfig, store: Store) -> Result<Self> {
        let cancel = CancelFlag::new();
        let perf = &config.performance;

        // One limiter serves both hosts; classes keep the pacing separate.
        let limiter = Arc::new(RateLimiter::new(perf.rate_limit_winticket));
        for class in [
            winticket::classes::GET_CUPS,
            winticket::classes::GET_CUP_DETAIL,
            winticket::classes::GET_RACE_DETAIL,
            winticket::classes::GET_ODDS,
        ] {
            limiter.set_interval(class, perf.rate_limit_winticket);
        }
        limiter.set_interval(yenjoy::classes::RESULT_HTML, perf.rate_limit_yenjoy_html);
        limiter.set_interval(yenjoy::classes::CALENDAR, perf.rate_limit_yenjoy_api);

        let policy = RetryPolicy {
            max_attempts: config.api.retry_count.max(1),
            backoff_base: config.api.retry_delay.max(1.0),
            max_delay: Duration::from_secs_f64(config.api.max_retry_delay.max(1.0)),
        };
        let timeout = Duration::from_secs(config.api.request_timeout.max(1));

        let winticket_client = Arc::new(
            WinticketClient::new(limiter.clone(), policy.clone(), timeout, cancel.clone())
                .context("Failed to build provider W client")?,
        );
        let yenjoy_client = Arc::new(
            YenjoyClient::new(limiter, policy, timeout, cancel.clone())
                .context("Failed to build provider Y client")?,
        );

        let store = store.with_batch_size(perf.saver_batch_size);

        Ok(Self {
            step1: Step1Updater::new(winticket_client.clone(), store.clone(), cancel.clone()),
            step2: Step2Updater::new(winticket_client.clone(), store.clone(), cancel.clone()),
            step3: Step3Updater::new(
                winticket_client.clone(),
                store.clone(),
                perf.step3_max_workers,
                cancel.clone(),
            ),
            step4: Step4Updater::new(
                winticket_client,
                store.clone(),
                perf.max_workers,
                cancel.clone(),
            ),
            step5: Step5Updater::new(
                yenjoy_client,
                store.clone(),
                perf.max_workers,
                cancel.clone(),
            ),
            store,
            cancel,
        })
    }

    /// Shared cancellation flag; cancel it to stop the current run between
    /// items, retries and batch chunks.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Run the selected stages over `[start, end]` in ascending order.
    /// A critical-stage failure (S1, S2, S5) short-circuits the rest.
    pub async fn run_period(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        steps: &[StepSpec],
        cup_filter: Option<Vec<String>>,
        force: bool,
    ) -> (bool, RunReport) {
        let steps = normalize_steps(steps);
        let mut report = RunReport {
            total_ok: true,
            ..Default::default()
        };
        if steps.is_empty() {
            report.total_ok = false;
            report.error = Some("no valid steps selected".into());
            return (false, report);
        }

        self.cancel.reset();
        info!(%start, %end, ?steps, ?cup_filter, force, "Starting pipeline run");

        let window = WorkWindow::new(start, end)
            .with_cups(cup_filter.unwrap_or_default())
            .with_force(force);

        for step in steps {
            if self.cancel.is_cancelled() {
                report.total_ok = false;
                report.error = Some("run cancelled".into());
                break;
            }

            info!(step, "--- stage starting ---");
            let outcome = match step {
                1 => self.step1.update_window(start, end).await,
                2 => self.step2.update_window(&window).await,
                3 => self.step3.update_window(&window).await,
                4 => self.step4.update_window(&window).await,
                5 => self.step5.update_window(&window).await,
                _ => unreachable!("normalize_steps only yields 1..=5"),
            };
            info!(
                step,
                ok = outcome.ok,
                count = outcome.count,
                message = %outcome.message,
                "--- stage finished ---"
            );

            let failed = !outcome.ok;
            report.steps.insert(step, outcome);

            if failed {
                report.total_ok = false;
                if CRITICAL_STEPS.contains(&step) {
                    warn!(step, "Critical stage failed, aborting remaining stages");
                    report.error = Some(format!("critical stage {step} failed"));
                    break;
                }
            }
        }

        (report.total_ok, report)
    }

    /// Run stages for one cup using its own date range as the window.
    pub async fn run_cup(
        &self,
        cup_id: &str,
        steps: &[StepSpec],
        force: bool,
    ) -> Result<(bool, RunReport)> {
        let range: Option<(String, String)> = self.store.query_one(
            "SELECT start_date, end_date FROM cups WHERE cup_id = ?1",
            &[Value::Text(cup_id.to_string())],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let (start_raw, end_raw) =
            range.with_context(|| format!("cup {cup_id} not found in store"))?;
        let start = crate::dates::parse_iso_date(&crate::dates::to_iso_str(&start_raw))?;
        let end = crate::dates::parse_iso_date(&crate::dates::to_iso_str(&end_raw))?;

        Ok(self
            .run_period(start, end, steps, Some(vec![cup_id.to_string()]), force)
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_accepts_both_spellings() {
        let specs = vec![
            StepSpec::from("step3"),
            StepSpec::from(1u8),
            StepSpec::from("5"),
            StepSpec::from("step1"),
        ];
        assert_eq!(normalize_steps(&specs), vec![1, 3, 5]);
    }

    #[test]
    fn normalize_drops_garbage() {
        let specs = vec![
            StepSpec::from("step9"),
            StepSpec::from(0u8),
            StepSpec::from("stepx"),
            StepSpec::from(2u8),
        ];
        assert_eq!(normalize_steps(&specs), vec![2]);
    }

    #[test]
    fn normalize_empty_means_no_run() {
        assert!(normalize_steps(&[]).is_empty());
    }
}
