pub mod http; // Shared fetch path: classification, retry, backoff
pub mod winticket; // Provider W JSON API (cups, schedules, races, odds)
pub mod yenjoy; // Provider Y HTML client (race results)
pub mod yenjoy_html; // Provider Y result-page DOM extraction

pub use http::{FetchError, HostClient, RetryPolicy};
