//! ATP results-archive scraping and endpoint templates.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use matchstats_core::{DataType, EntityStatus, ListingEntity, NaturalKey};
use matchstats_storage::HttpFetchClient;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{ResultSource, SourceError};

pub const SITE_ROOT: &str = "https://www.atptour.com";

/// URL templates with `{year}`, `{tournament_id}` and `{match_id}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointTemplates {
    pub site_root: String,
    pub calendar: String,
    pub key_stats: String,
    pub rally_analysis: String,
    pub stroke_analysis: String,
    pub court_vision: String,
}

impl Default for EndpointTemplates {
    fn default() -> Self {
        Self {
            site_root: SITE_ROOT.to_string(),
            calendar: format!("{SITE_ROOT}/en/scores/results-archive?year={{year}}"),
            key_stats: format!(
                "{SITE_ROOT}/-/Hawkeye/MatchStats/Complete/{{year}}/{{tournament_id}}/{{match_id}}"
            ),
            rally_analysis: format!(
                "{SITE_ROOT}/-/Hawkeye/MatchStats/RallyAnalysis/{{year}}/{{tournament_id}}/{{match_id}}"
            ),
            stroke_analysis: format!(
                "{SITE_ROOT}/-/Hawkeye/MatchStats/StrokeAnalysis/{{year}}/{{tournament_id}}/{{match_id}}"
            ),
            court_vision: format!(
                "{SITE_ROOT}/-/Hawkeye/MatchStats/CourtVision/{{year}}/{{tournament_id}}/{{match_id}}"
            ),
        }
    }
}

impl EndpointTemplates {
    pub fn from_yaml_str(raw: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(raw).context("parsing endpoint templates")
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading endpoint templates {}", path.display()))?;
        Self::from_yaml_str(&raw).with_context(|| format!("in {}", path.display()))
    }

    pub fn calendar_url(&self, year: i32) -> String {
        self.calendar.replace("{year}", &year.to_string())
    }

    fn template_for(&self, data_type: DataType) -> &str {
        match data_type {
            DataType::KeyStats => &self.key_stats,
            DataType::RallyAnalysis => &self.rally_analysis,
            DataType::StrokeAnalysis => &self.stroke_analysis,
            DataType::CourtVision => &self.court_vision,
        }
    }

    /// Artifact URL for a match key; the API expects upper-case match ids.
    pub fn artifact_url(&self, data_type: DataType, key: &NaturalKey) -> Option<String> {
        let match_id = key.match_id.as_deref()?;
        Some(
            self.template_for(data_type)
                .replace("{year}", &key.year.to_string())
                .replace("{tournament_id}", &key.tournament_id)
                .replace("{match_id}", &match_id.to_ascii_uppercase()),
        )
    }

    /// Resolves a site-relative link against `site_root`.
    pub fn absolute(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href.to_string()
        } else {
            format!("{}{}", self.site_root.trim_end_matches('/'), href)
        }
    }
}

#[derive(Debug, Clone)]
pub struct AtpResultSource {
    http: HttpFetchClient,
    endpoints: EndpointTemplates,
}

impl AtpResultSource {
    pub fn new(http: HttpFetchClient, endpoints: EndpointTemplates) -> Self {
        Self { http, endpoints }
    }
}

#[async_trait]
impl ResultSource for AtpResultSource {
    fn source_id(&self) -> &'static str {
        "atp"
    }

    async fn list_calendar(&self, year: i32) -> Result<Vec<ListingEntity>, SourceError> {
        let url = self.endpoints.calendar_url(year);
        let body = self.http.get_text(&url).await?;
        let tournaments = parse_calendar(&body, year, &self.endpoints)?;
        info!(year, url = %url, tournaments = tournaments.len(), "calendar listed");
        Ok(tournaments)
    }

    async fn list_matches(&self, tournament: &ListingEntity) -> Result<Vec<ListingEntity>, SourceError> {
        let Some(results_url) = tournament.url.as_deref() else {
            let label = tournament
                .natural_key()
                .map(|k| k.to_string())
                .unwrap_or_else(|| "<no key>".to_string());
            return Err(SourceError::MissingUrl(label));
        };
        let url = format!("{results_url}?matchType=singles");
        let body = self.http.get_text(&url).await?;
        let matches = parse_results(&body, tournament, &self.endpoints)?;
        info!(url = %url, matches = matches.len(), "tournament results listed");
        Ok(matches)
    }
}

fn selector(raw: &str) -> Result<Selector, SourceError> {
    Selector::parse(raw).map_err(|e| SourceError::Selector {
        selector: raw.to_string(),
        message: e.to_string(),
    })
}

fn text_or_none(value: &str) -> Option<String> {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

fn select_first<'a>(scope: ElementRef<'a>, sel: &Selector) -> Option<ElementRef<'a>> {
    scope.select(sel).next()
}

fn first_text(scope: ElementRef<'_>, sel: &Selector) -> Option<String> {
    select_first(scope, sel).and_then(|n| text_or_none(&n.text().collect::<String>()))
}

fn first_attr(scope: ElementRef<'_>, sel: &Selector, attr: &str) -> Option<String> {
    select_first(scope, sel)
        .and_then(|n| n.value().attr(attr))
        .and_then(text_or_none)
}

/// `split('/')[-2]` of a link, i.e. the id segment of `/en/.../<slug>/<id>/overview`.
fn second_last_segment(href: &str) -> Option<String> {
    let parts: Vec<&str> = href.split('/').collect();
    parts
        .len()
        .checked_sub(2)
        .and_then(|idx| parts.get(idx))
        .and_then(|s| text_or_none(s))
}

fn last_segment(href: &str) -> Option<String> {
    href.split('/').next_back().and_then(text_or_none)
}

fn category_from_banner(src: &str) -> &'static str {
    match src.rsplit('/').next().unwrap_or_default() {
        "categorystamps_grandslam.png" => "Grand Slam",
        "categorystamps_1000.png" => "ATP Masters 1000",
        "categorystamps_500.png" => "ATP 500",
        "categorystamps_250.png" => "ATP 250",
        _ => "Other",
    }
}

/// `archive` results pages belong to finished tournaments, `current` ones to live events.
fn status_from_results_href(href: Option<&str>) -> EntityStatus {
    let Some(href) = href else {
        return EntityStatus::Pending;
    };
    let segments: Vec<&str> = href.split('/').collect();
    if segments.contains(&"archive") {
        EntityStatus::Completed
    } else if segments.contains(&"current") {
        EntityStatus::Ongoing
    } else {
        EntityStatus::Pending
    }
}

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let prefix = name.get(..3)?.to_ascii_lowercase();
    MONTHS
        .iter()
        .position(|m| *m == prefix)
        .and_then(|idx| u32::try_from(idx + 1).ok())
}

/// `"1 - 7 Jan, 2024"` style ranges become `"2024.01.01 - 2024.01.07"`.
/// Unparseable input is returned unchanged.
pub fn format_date_range(raw: &str) -> String {
    let parse = || -> Option<String> {
        let (start, end) = raw.split_once(" - ")?;
        let end_parts: Vec<&str> = end.split([' ', ',']).filter(|s| !s.is_empty()).collect();
        let [end_day, end_month, end_year] = end_parts.as_slice() else {
            return None;
        };
        let end_day: u32 = end_day.parse().ok()?;
        let end_month = month_number(end_month)?;
        let end_year: i32 = end_year.parse().ok()?;

        let start_parts: Vec<&str> = start.split([' ', ',']).filter(|s| !s.is_empty()).collect();
        let (start_day, start_month, start_year) = match start_parts.as_slice() {
            [d, m, y] => (d.parse::<u32>().ok()?, month_number(m)?, y.parse::<i32>().ok()?),
            [d, m] => (d.parse::<u32>().ok()?, month_number(m)?, end_year),
            [d] => (d.parse::<u32>().ok()?, end_month, end_year),
            _ => return None,
        };
        Some(format!(
            "{start_year}.{start_month:02}.{start_day:02} - {end_year}.{end_month:02}.{end_day:02}"
        ))
    };
    parse().unwrap_or_else(|| raw.trim().to_string())
}

/// Tournaments on a results-archive page, one per `ul.events` block.
pub fn parse_calendar(
    html: &str,
    year: i32,
    endpoints: &EndpointTemplates,
) -> Result<Vec<ListingEntity>, SourceError> {
    let document = Html::parse_document(html);
    let events = selector("ul.events")?;
    let name = selector("span.name")?;
    let profile = selector("a.tournament__profile")?;
    let venue = selector("span.venue")?;
    let date = selector("span.Date")?;
    let results = selector("div.non-live-cta a")?;
    let banner = selector("img.events_banner")?;
    let winner = selector("dl.winner dd")?;

    let mut out = Vec::new();
    for event in document.select(&events) {
        let tournament_id = first_attr(event, &profile, "href").and_then(|h| second_last_segment(&h));
        let results_href = first_attr(event, &results, "href");
        let status = status_from_results_href(results_href.as_deref());
        let category = first_attr(event, &banner, "src")
            .map(|src| category_from_banner(&src))
            .unwrap_or("Other");
        let winners: Vec<String> = event
            .select(&winner)
            .filter_map(|n| text_or_none(&n.text().collect::<String>()))
            .collect();

        let mut entity = ListingEntity {
            tournament_id,
            ..ListingEntity::tournament(year, "", status)
        }
        .with_attribute("tournament", first_text(event, &name))
        .with_attribute("category", category)
        .with_attribute(
            "location",
            first_text(event, &venue).map(|v| v.trim_matches(|c| c == ' ' || c == '|').to_string()),
        )
        .with_attribute(
            "date_start",
            first_text(event, &date)
                .map(|d| format_date_range(d.trim_matches(|c| c == ' ' || c == '|'))),
        );
        if !winners.is_empty() {
            entity = entity.with_attribute("winner", winners.join(", "));
        }
        if let Some(href) = results_href {
            entity = entity.with_url(endpoints.absolute(&href));
        }
        out.push(entity);
    }
    debug!(year, parsed = out.len(), "parsed calendar page");
    Ok(out)
}

/// `"second round - Centre Court"` becomes `"Second Round"`.
fn format_round(raw: &str) -> String {
    let head = raw.split(" - ").next().unwrap_or_default().replace('-', "");
    head.split_whitespace()
        .map(|word| {
            let lower = word.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn move_bracketed_part(item: &str) -> String {
    match (item.find('('), item.find(')')) {
        (Some(open), Some(close)) if open < close => {
            format!("{}{}{}", &item[..open], &item[close + 1..], &item[open..=close])
        }
        _ => item.to_string(),
    }
}

fn player_set_scores(scores: ElementRef<'_>, item: &Selector, span: &Selector) -> Vec<String> {
    scores
        .select(item)
        .filter_map(|set| {
            let spans: Vec<String> = set
                .select(span)
                .map(|s| s.text().collect::<String>().trim().to_string())
                .collect();
            match spans.as_slice() {
                [] => None,
                [games] => Some(games.clone()),
                [games, tiebreak, ..] => Some(format!("{games}({tiebreak})")),
            }
        })
        .collect()
}

/// Singles matches on a tournament results page. Matches without a stats
/// link carry no match id.
pub fn parse_results(
    html: &str,
    tournament: &ListingEntity,
    endpoints: &EndpointTemplates,
) -> Result<Vec<ListingEntity>, SourceError> {
    let document = Html::parse_document(html);
    let match_sel = selector("div.atp_accordion-item div.match")?;
    let round_sel = selector("strong")?;
    let cta_sel = selector("div.match-cta a")?;
    let name_sel = selector("div.name")?;
    let link_sel = selector("a, p")?;
    let seed_sel = selector("span")?;
    let scores_sel = selector("div.scores")?;
    let score_item_sel = selector("div.score-item")?;

    let year = tournament.year.unwrap_or_default();
    let tournament_id = tournament.tournament_id.clone().unwrap_or_default();

    let mut out = Vec::new();
    for elem in document.select(&match_sel) {
        let round = first_text(elem, &round_sel).map(|r| format_round(&r));

        let mut stats_href = None;
        let mut court_vision = 0;
        for link in elem.select(&cta_sel) {
            let label = link.text().collect::<String>();
            if label.contains("Stats") && stats_href.is_none() {
                stats_href = link.value().attr("href").map(str::to_string);
            }
            if label.contains("Court Vision") {
                court_vision = 1;
            }
        }
        let stats_url = stats_href.as_deref().map(|h| endpoints.absolute(h));
        let match_id = stats_url.as_deref().and_then(last_segment);
        let status = if match_id.is_some() {
            EntityStatus::Completed
        } else {
            EntityStatus::Pending
        };

        let mut entity = ListingEntity::for_match(year, tournament_id.clone(), match_id, status)
            .with_attribute("round", round)
            .with_attribute("court_vision", court_vision);
        for attr in ["tournament", "category"] {
            if let Some(value) = tournament.attributes.get(attr) {
                entity = entity.with_attribute(attr, value.clone());
            }
        }

        let players: Vec<ElementRef<'_>> = elem.select(&name_sel).collect();
        if players.len() == 2 {
            for (idx, player) in players.iter().enumerate() {
                let prefix = format!("player{}", idx + 1);
                let info = select_first(*player, &link_sel);
                let name = info.and_then(|n| n.text().next().and_then(text_or_none));
                let id = info
                    .and_then(|n| n.value().attr("href"))
                    .and_then(second_last_segment);
                let seed = first_text(*player, &seed_sel)
                    .map(|s| s.trim_matches(|c| c == '(' || c == ')').to_string());
                entity = entity
                    .with_attribute(&format!("{prefix}_name"), name)
                    .with_attribute(&format!("{prefix}_id"), id)
                    .with_attribute(&format!("{prefix}_seed"), seed);
            }
        }

        let scores: Vec<Vec<String>> = elem
            .select(&scores_sel)
            .map(|s| player_set_scores(s, &score_item_sel, &seed_sel))
            .collect();
        if let [p1, p2, ..] = scores.as_slice() {
            let combined: Vec<String> = p1
                .iter()
                .zip(p2.iter())
                .map(|(a, b)| move_bracketed_part(&format!("{a}{b}")))
                .collect();
            if !combined.is_empty() {
                entity = entity.with_attribute("score", combined.join(" "));
            }
        }

        if let Some(url) = stats_url {
            entity = entity.with_url(url);
        }
        out.push(entity);
    }
    debug!(year, %tournament_id, parsed = out.len(), "parsed results page");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use matchstats_core::FieldValue;

    const CALENDAR_HTML: &str = r#"
    <html><body>
      <ul class="events">
        <li>
          <img class="events_banner" src="/assets/categorystamps_250.png"/>
          <span class="name">Brisbane International</span>
          <a class="tournament__profile" href="/en/tournaments/brisbane/0339/overview">Profile</a>
          <span class="venue">Brisbane, Australia | </span>
          <span class="Date">31 Dec, 2023 - 7 Jan, 2024</span>
          <dl class="winner"><dt>Singles Winner</dt><dd><a href="/p">Grigor Dimitrov</a></dd></dl>
          <div class="non-live-cta"><a href="/en/scores/archive/brisbane/339/2024/results">Results</a></div>
        </li>
      </ul>
      <ul class="events">
        <li>
          <img class="events_banner" src="/assets/categorystamps_grandslam.png"/>
          <span class="name">Australian Open</span>
          <a class="tournament__profile" href="/en/tournaments/australian-open/580/overview">Profile</a>
          <span class="venue">Melbourne, Australia</span>
          <span class="Date">14 - 28 Jan, 2024</span>
          <div class="non-live-cta"><a href="/en/scores/current/australian-open/580/results">Results</a></div>
        </li>
      </ul>
      <ul class="events">
        <li>
          <span class="name">Davis Cup Finals</span>
          <a class="tournament__profile" href="/en/tournaments/davis-cup/8359/overview">Profile</a>
          <div class="non-live-cta"></div>
        </li>
      </ul>
    </body></html>"#;

    const RESULTS_HTML: &str = r#"
    <div class="atp_accordion-item">
      <div class="match">
        <strong>final - Pat Rafter Arena</strong>
        <div class="name"><a href="/en/players/grigor-dimitrov/d875/overview">Grigor  Dimitrov</a><span>(2)</span></div>
        <div class="name"><a href="/en/players/holger-rune/r0dg/overview">Holger Rune</a><span>(1)</span></div>
        <div class="scores">
          <div class="score-item"><span>7</span></div>
          <div class="score-item"><span>6</span></div>
        </div>
        <div class="scores">
          <div class="score-item"><span>6</span><span>5</span></div>
          <div class="score-item"><span>4</span></div>
        </div>
        <div class="match-cta">
          <a href="/en/players/h2h">H2H</a>
          <a href="/en/scores/stats-centre/archive/2024/339/MS001">Stats</a>
        </div>
      </div>
      <div class="match">
        <strong>semi-finals</strong>
        <div class="name"><p>Qualifier</p><span></span></div>
        <div class="name"><p>Bye</p><span></span></div>
        <div class="match-cta"><a href="/en/players/h2h">H2H</a></div>
      </div>
    </div>"#;

    #[test]
    fn calendar_page_yields_tournaments_with_status_and_category() {
        let endpoints = EndpointTemplates::default();
        let tournaments = parse_calendar(CALENDAR_HTML, 2024, &endpoints).unwrap();
        assert_eq!(tournaments.len(), 3);

        let brisbane = &tournaments[0];
        assert_eq!(brisbane.status, EntityStatus::Completed);
        assert_eq!(
            brisbane.natural_key(),
            NaturalKey::tournament(2024, "339")
        );
        assert_eq!(brisbane.attribute_text("category"), Some("ATP 250"));
        assert_eq!(brisbane.attribute_text("location"), Some("Brisbane, Australia"));
        assert_eq!(
            brisbane.attribute_text("date_start"),
            Some("2023.12.31 - 2024.01.07")
        );
        assert_eq!(brisbane.attribute_text("winner"), Some("Grigor Dimitrov"));
        assert_eq!(
            brisbane.url.as_deref(),
            Some("https://www.atptour.com/en/scores/archive/brisbane/339/2024/results")
        );

        let open = &tournaments[1];
        assert_eq!(open.status, EntityStatus::Ongoing);
        assert_eq!(open.attribute_text("category"), Some("Grand Slam"));
        assert_eq!(open.attribute_text("date_start"), Some("2024.01.14 - 2024.01.28"));

        let davis = &tournaments[2];
        assert_eq!(davis.status, EntityStatus::Pending);
        assert!(davis.url.is_none());
        assert_eq!(davis.attribute_text("category"), Some("Other"));
    }

    #[test]
    fn results_page_yields_matches_and_keyless_placeholders() {
        let endpoints = EndpointTemplates::default();
        let tournament = ListingEntity::tournament(2024, "339", EntityStatus::Completed)
            .with_attribute("tournament", "Brisbane International")
            .with_attribute("category", "ATP 250");
        let matches = parse_results(RESULTS_HTML, &tournament, &endpoints).unwrap();
        assert_eq!(matches.len(), 2);

        let final_match = &matches[0];
        assert_eq!(
            final_match.natural_key(),
            NaturalKey::for_match(2024, "339", "ms001")
        );
        assert_eq!(final_match.status, EntityStatus::Completed);
        assert_eq!(final_match.attribute_text("round"), Some("Final"));
        assert_eq!(final_match.attribute_text("player1_name"), Some("Grigor Dimitrov"));
        assert_eq!(final_match.attribute_text("player1_id"), Some("d875"));
        assert_eq!(final_match.attribute_text("player2_seed"), Some("1"));
        assert_eq!(final_match.attribute_text("score"), Some("76(5) 64"));
        assert_eq!(final_match.attribute_text("category"), Some("ATP 250"));
        assert_eq!(final_match.attributes.get("court_vision"), Some(&FieldValue::Int(0)));

        let placeholder = &matches[1];
        assert_eq!(placeholder.status, EntityStatus::Pending);
        assert_eq!(placeholder.attribute_text("round"), Some("Semifinals"));
        assert!(placeholder.natural_key().is_none());
    }

    #[test]
    fn artifact_urls_use_upper_case_match_ids() {
        let endpoints = EndpointTemplates::default();
        let key = NaturalKey::for_match(2024, "339", "ms001").unwrap();
        assert_eq!(
            endpoints.artifact_url(DataType::KeyStats, &key).as_deref(),
            Some("https://www.atptour.com/-/Hawkeye/MatchStats/Complete/2024/339/MS001")
        );
        let tournament = NaturalKey::tournament(2024, "339").unwrap();
        assert!(endpoints.artifact_url(DataType::KeyStats, &tournament).is_none());
    }

    #[test]
    fn endpoint_overrides_merge_with_defaults() {
        let endpoints = EndpointTemplates::from_yaml_str(
            "calendar: \"http://localhost:9999/archive?y={year}\"\n",
        )
        .unwrap();
        assert_eq!(endpoints.calendar_url(2023), "http://localhost:9999/archive?y=2023");
        assert_eq!(endpoints.key_stats, EndpointTemplates::default().key_stats);
    }

    #[test]
    fn unparseable_dates_are_kept_verbatim() {
        assert_eq!(format_date_range("TBA"), "TBA");
        assert_eq!(format_date_range("1 Feb - 9 Feb, 2025"), "2025.02.01 - 2025.02.09");
    }
}
