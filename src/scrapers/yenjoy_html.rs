//! Provider Y result-page DOM extraction.
//!
//! The page carries three blocks we care about: the finish-order table
//! (`.result-table-detail`), the payouts table (`.result-pay`), and the
//! lap-position grid (`.result-b-hyo-lap-wrapper`). Column order in the
//! finish table is resolved by header text, not position, and nothing here
//! raises on partial data: whatever was recoverable comes back together
//! with an `issues` list.

use crate::models::{LapPositionRow, PayoutRow, ResultRow};
use anyhow::{anyhow, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Everything extracted from one result page.
#[derive(Debug, Default)]
pub struct ResultPage {
    pub race_name: Option<String>,
    pub race_number: Option<i64>,
    pub venue: Option<String>,
    pub weather: Option<String>,
    pub wind_speed: Option<String>,
    pub results: Vec<ResultRow>,
    pub payouts: Vec<PayoutRow>,
    pub laps: Vec<LapPositionRow>,
    /// Human-readable notes about anything skipped or unparsable.
    pub issues: Vec<String>,
}

struct Selectors {
    race_info: Selector,
    race_name: Selector,
    race_num: Selector,
    place: Selector,
    condition: Selector,
    result_table: Selector,
    thead_cells: Selector,
    body_rows: Selector,
    row_cells: Selector,
    player_link: Selector,
    pay_table: Selector,
    pay_rows: Selector,
    lap_wrapper: Selector,
    lap_section: Selector,
    lap_section_name: Selector,
    bike_icon: Selector,
    racer_name: Selector,
}

fn selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| anyhow!("bad selector {s}: {e}"))
}

impl Selectors {
    fn new() -> Result<Self> {
        Ok(Self {
            race_info: selector(".raceInfo")?,
            race_name: selector(".raceName")?,
            race_num: selector(".raceNum")?,
            place: selector(".place")?,
            condition: selector(".raceCondition")?,
            result_table: selector(".result-table-detail")?,
            thead_cells: selector("thead tr th")?,
            body_rows: selector("tbody tr")?,
            row_cells: selector("td")?,
            player_link: selector(r#"a[href*="/racer/data/"]"#)?,
            pay_table: selector(".result-pay")?,
            pay_rows: selector("tr")?,
            lap_wrapper: selector("div.result-b-hyo-lap-wrapper")?,
            lap_section: selector("div.b-hyo")?,
            lap_section_name: selector("th.bg-base-color")?,
            bike_icon: selector("span.bike-icon-wrapper")?,
            racer_name: selector("span.racer-nm")?,
        })
    }
}

/// Parses result pages. Build once and reuse; selector compilation is the
/// only fallible part.
pub struct ResultPageParser {
    sel: Selectors,
    img_tag: Regex,
    payout_cell: Regex,
    player_id: Regex,
    race_num: Regex,
    weather: Regex,
    wind: Regex,
}

impl ResultPageParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            sel: Selectors::new()?,
            img_tag: Regex::new(r"<img\s+[^>]*>")?,
            payout_cell: Regex::new(r"([0-9=\-\s]+?)\s*(\d+)円\s*\((\d+)\)")?,
            player_id: Regex::new(r"/racer/data/(\d+)")?,
            race_num: Regex::new(r"(\d+)R")?,
            weather: Regex::new(r"天気:([^\s]+)")?,
            wind: Regex::new(r"風速:([^\s]+)")?,
        })
    }

    /// Parse a full result page. `<img>` tags are stripped first; the
    /// pages embed dozens of icon images that only cost memory.
    pub fn parse(&self, html: &str) -> ResultPage {
        let stripped = self.img_tag.replace_all(html, "");
        let doc = Html::parse_document(&stripped);

        let mut page = ResultPage::default();
        self.parse_header(&doc, &mut page);
        self.parse_results(&doc, &mut page);
        self.parse_payouts(&doc, &mut page);
        self.parse_laps(&doc, &mut page);
        page
    }

    fn parse_header(&self, doc: &Html, page: &mut ResultPage) {
        let Some(info) = doc.select(&self.sel.race_info).next() else {
            page.issues.push("race header block missing".into());
            return;
        };
        page.race_name = info
            .select(&self.sel.race_name)
            .next()
            .map(|e| text_of(&e));
        page.race_number = info
            .select(&self.sel.race_num)
            .next()
            .and_then(|e| {
                let text = text_of(&e);
                self.race_num
                    .captures(&text)
                    .and_then(|c| c[1].parse().ok())
            });
        page.venue = info.select(&self.sel.place).next().map(|e| text_of(&e));
        if let Some(cond) = info.select(&self.sel.condition).next() {
            let cond_text = text_of(&cond);
            page.weather = self
                .weather
                .captures(&cond_text)
                .map(|c| c[1].to_string());
            page.wind_speed = self.wind.captures(&cond_text).map(|c| c[1].to_string());
        }
    }

    fn parse_results(&self, doc: &Html, page: &mut ResultPage) {
        let Some(table) = doc.select(&self.sel.result_table).next() else {
            page.issues.push("finish-order table missing".into());
            return;
        };

        let headers: Vec<String> = table
            .select(&self.sel.thead_cells)
            .map(|th| text_of(&th))
            .collect();

        for row in table.select(&self.sel.body_rows) {
            let cells: Vec<ElementRef> = row.select(&self.sel.row_cells).collect();
            if cells.len() < 3 {
                continue;
            }

            let mut item = ResultRow::default();
            let mut rank: Option<i64> = None;
            let mut frame: Option<i64> = None;

            for (i, cell) in cells.iter().enumerate() {
                let value = text_of(cell);
                let key = headers.get(i).map(|h| header_key(h)).unwrap_or(
                    // No header row: the first three columns are always
                    // rank, frame, rider on this layout.
                    match i {
                        0 => Some("rank"),
                        1 => Some("frame"),
                        2 => Some("name"),
                        _ => None,
                    },
                );
                match key {
                    Some("rank") => rank = value.parse().ok(),
                    Some("frame") => frame = value.parse().ok(),
                    Some("name") => item.player_name = value,
                    Some("age") => item.age = value.parse().ok(),
                    Some("prefecture") => item.prefecture = Some(value),
                    Some("term") => item.term = Some(value),
                    Some("class") => item.class = Some(value),
                    Some("margin") => item.margin = Some(value),
                    Some("last_lap") => item.last_lap_time = Some(value),
                    Some("winning_move") => item.winning_move = Some(value),
                    _ => {}
                }
            }

            item.player_id = row
                .select(&self.sel.player_link)
                .next()
                .and_then(|a| a.value().attr("href"))
                .and_then(|href| self.player_id.captures(href))
                .map(|c| c[1].to_string());

            match (rank, frame) {
                (Some(rank), Some(frame)) => {
                    item.rank = rank;
                    item.frame = frame;
                    page.results.push(item);
                }
                _ => {
                    // Disqualified or abandoned riders carry a non-numeric
                    // rank cell; record and move on.
                    page.issues
                        .push(format!("finish row without numeric rank/frame: {:?}", item.player_name));
                }
            }
        }
    }

    fn parse_payouts(&self, doc: &Html, page: &mut ResultPage) {
        let Some(table) = doc.select(&self.sel.pay_table).next() else {
            page.issues.push("payouts table missing".into());
            return;
        };

        for row in table.select(&self.sel.pay_rows) {
            let cells: Vec<ElementRef> = row.select(&self.sel.row_cells).collect();
            if cells.is_empty() {
                continue;
            }
            let ticket_type = text_of(&cells[0]);
            if ticket_type.is_empty() || ticket_type.contains("未発売") {
                continue;
            }
            for cell in &cells[1..] {
                let cell_text = text_of(cell);
                for caps in self.payout_cell.captures_iter(&cell_text) {
                    let combination = normalize_combination(&caps[1]);
                    let amount: i64 = match caps[2].parse() {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    let popularity: i64 = caps[3].parse().unwrap_or(0);
                    if amount > 0 && !combination.is_empty() {
                        page.payouts.push(PayoutRow {
                            ticket_type: ticket_type.clone(),
                            combination,
                            amount,
                            popularity,
                        });
                    }
                }
            }
        }
    }

    fn parse_laps(&self, doc: &Html, page: &mut ResultPage) {
        let Some(wrapper) = doc.select(&self.sel.lap_wrapper).next() else {
            // Older pages lack the grid entirely; that is not a defect.
            return;
        };

        for section in wrapper.select(&self.sel.lap_section) {
            let Some(name_el) = section.select(&self.sel.lap_section_name).next() else {
                continue;
            };
            let section_name = text_of(&name_el);

            for icon in section.select(&self.sel.bike_icon) {
                let mut frame: Option<i64> = None;
                let mut x: Option<i64> = None;
                let mut y: Option<i64> = None;
                for class in icon.value().classes() {
                    if let Some(v) = class.strip_prefix("bikeno-") {
                        frame = v.parse().ok();
                    } else if let Some(v) = class.strip_prefix("x-") {
                        x = v.parse().ok();
                    } else if let Some(v) = class.strip_prefix("y-") {
                        y = v.parse().ok();
                    }
                }
                let player_name = icon
                    .select(&self.sel.racer_name)
                    .next()
                    .map(|e| text_of(&e))
                    .unwrap_or_default();

                match (frame, x, y) {
                    (Some(frame), Some(x), Some(y)) => page.laps.push(LapPositionRow {
                        section: section_name.clone(),
                        frame,
                        player_name,
                        x,
                        y,
                    }),
                    _ => page.issues.push(format!(
                        "lap icon without full coordinates in section {section_name}"
                    )),
                }
            }
        }
    }
}

fn text_of(el: &ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Map a finish-table header cell to a field key. Partial match, because
/// the site decorates headers with annotations from time to time.
fn header_key(header: &str) -> Option<&'static str> {
    const MAP: &[(&str, &str)] = &[
        ("着", "rank"),
        ("車番", "frame"),
        ("選手名", "name"),
        ("年齢", "age"),
        ("府県", "prefecture"),
        ("期別", "term"),
        ("級班", "class"),
        ("着差", "margin"),
        ("上り", "last_lap"),
        ("決まり手", "winning_move"),
    ];
    // Exact match wins; "着差" must not collapse into "着".
    for &(jp, key) in MAP {
        if header == jp {
            return Some(key);
        }
    }
    for &(jp, key) in MAP.iter().rev() {
        if header.contains(jp) {
            return Some(key);
        }
    }
    None
}

/// Collapse a free-text combination like `1 = 4` or `1-2-3` into a
/// canonical `=`/`-`-joined form without spaces.
fn normalize_combination(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join("")
}
