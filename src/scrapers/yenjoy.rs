//! Provider Y (yen-joy) HTML client.
//!
//! Results live behind a deterministic URL built from the venue code, the
//! cup's first day and the race date; there is no JSON API for the data we
//! need, so the client fetches the page and hands it to the DOM parser.
//! The monthly calendar index doubles as a cheap availability probe before
//! the heavier per-race pages are touched.

use crate::cancel::CancelFlag;
use crate::ratelimit::RateLimiter;
use crate::scrapers::http::{FetchError, HostClient, RetryPolicy};
use crate::scrapers::yenjoy_html::{ResultPage, ResultPageParser};
use anyhow::{anyhow, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, REFERER, USER_AGENT};
use scraper::{Html, Selector};
use std::sync::Arc;
use std::time::Duration;

pub const YENJOY_BASE_URL: &str = "https://www.yen-joy.net";

const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub mod classes {
    /// Result page fetches; the strictest pacing class in the system.
    pub const RESULT_HTML: &str = "yenjoy.result_html";
    /// Monthly calendar index probes; lighter pages, their own pacing.
    pub const CALENDAR: &str = "yenjoy.calendar";
}

pub struct YenjoyClient {
    http: HostClient,
    parser: ResultPageParser,
    anchors: Selector,
    base_url: String,
}

impl YenjoyClient {
    pub fn new(
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
        timeout: Duration,
        cancel: CancelFlag,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(DESKTOP_UA));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9"),
        );
        headers.insert(REFERER, HeaderValue::from_static("https://www.yen-joy.net/"));
        let http = HostClient::new(headers, timeout, limiter, policy, cancel)?;
        Ok(Self {
            http,
            parser: ResultPageParser::new()?,
            anchors: Selector::parse("a[href]").map_err(|e| anyhow!("bad selector: {e}"))?,
            base_url: YENJOY_BASE_URL.to_string(),
        })
    }

    /// Result detail URL:
    /// `/kaisai/race/result/detail/{YYYYMM}/{venue_code}/{first_day}/{race_date}/{race_number}`.
    ///
    /// `first_day` is the first day of the cup, `race_date` the day the race
    /// ran, both `YYYYMMDD`; the leading `YYYYMM` is taken from the race
    /// date.
    pub fn result_url(
        &self,
        venue_code: &str,
        cup_first_day: &str,
        race_date: &str,
        race_number: i64,
    ) -> String {
        format!(
            "{}/kaisai/race/result/detail/{}/{}/{}/{}/{}",
            self.base_url,
            &race_date[..6.min(race_date.len())],
            venue_code,
            cup_first_day,
            race_date,
            race_number
        )
    }

    /// Monthly calendar index URL: `/racelist/{YYYYMM}/index.html`.
    pub fn calendar_url(&self, year_month: &str) -> String {
        format!("{}/racelist/{}/index.html", self.base_url, year_month)
    }

    /// Fetch and parse one race result page.
    pub async fn race_result(
        &self,
        venue_code: &str,
        cup_first_day: &str,
        race_date: &str,
        race_number: i64,
    ) -> Result<ResultPage, FetchError> {
        let url = self.result_url(venue_code, cup_first_day, race_date, race_number);
        let html = self.http.fetch_text(&url, classes::RESULT_HTML).await?;
        Ok(self.parser.parse(&html))
    }

    /// Whether the calendar already links result pages for `date_compact`
    /// (`YYYYMMDD`). A missing month index counts as not published.
    pub async fn results_published(&self, date_compact: &str) -> Result<bool, FetchError> {
        let year_month = &date_compact[..6.min(date_compact.len())];
        let url = self.calendar_url(year_month);
        match self.http.fetch_text(&url, classes::CALENDAR).await {
            Ok(html) => Ok(self.has_result_link(&html, date_compact)),
            Err(FetchError::NotYetPublished) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn has_result_link(&self, html: &str, date_compact: &str) -> bool {
        let doc = Html::parse_document(html);
        doc.select(&self.anchors).any(|a| {
            a.value()
                .attr("href")
                .is_some_and(|href| href.contains(date_compact) && href.contains("result"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> YenjoyClient {
        let limiter = Arc::new(RateLimiter::new(0.0));
        YenjoyClient::new(
            limiter,
            RetryPolicy::default(),
            Duration::from_secs(30),
            CancelFlag::new(),
        )
        .unwrap()
    }

    #[test]
    fn result_url_shape() {
        let client = test_client();
        assert_eq!(
            client.result_url("34", "20250314", "20250315", 12),
            "https://www.yen-joy.net/kaisai/race/result/detail/202503/34/20250314/20250315/12"
        );
    }

    #[test]
    fn calendar_url_shape() {
        let client = test_client();
        assert_eq!(
            client.calendar_url("202503"),
            "https://www.yen-joy.net/racelist/202503/index.html"
        );
    }

    #[test]
    fn calendar_link_scan_needs_date_and_result() {
        let client = test_client();
        let html = r#"
        <html><body>
          <a href="/kaisai/race/index/50/2/20250315">出走表</a>
          <a href="/kaisai/race/result/detail/202503/34/20250314/20250315/1">結果</a>
        </body></html>
        "#;
        assert!(client.has_result_link(html, "20250315"));
        // Same page, a day whose results are not linked yet.
        assert!(!client.has_result_link(html, "20250316"));
        // An index link alone is not a result link.
        let index_only = r#"<a href="/kaisai/race/index/50/2/20250315">出走表</a>"#;
        assert!(!client.has_result_link(index_only, "20250315"));
    }
}
