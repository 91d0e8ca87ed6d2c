//! Per-data-type conversion of decrypted artifacts into table rows.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use matchstats_core::{
    ColumnType, DataType, DecryptedArtifact, FieldValue, StoredRecord, TableSpec,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::{NormalizeContext, NormalizeError, RecordNormalizer};

const PLAYER_SLOTS: [&str; 2] = ["player1", "player2"];
const HANDS: [&str; 2] = ["forehand", "backhand"];

/// Stat-name layout of key-stats artifacts. Loadable from YAML so layout
/// drift (qualifier draws, grand-slam variants) is a data change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMap {
    /// Snake-cased stat names expected in a complete artifact, in column order.
    pub stat_columns: Vec<String>,
    /// Ratio stats (`"12/20 (60%)"`) that also get a `<name>_pct` column.
    pub percentage_columns: Vec<String>,
    pub renames: BTreeMap<String, String>,
    /// Post-rename names of speed columns checked against `speed_cap`.
    pub speed_columns: Vec<String>,
    pub speed_cap: f64,
    pub missing_sentinel: i64,
}

impl Default for ColumnMap {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            stat_columns: owned(&[
                "serve_rating",
                "aces",
                "double_faults",
                "1st_serve",
                "1st_serve_points_won",
                "2nd_serve_points_won",
                "break_points_saved",
                "service_games_played",
                "return_rating",
                "1st_serve_return_points_won",
                "2nd_serve_return_points_won",
                "break_points_converted",
                "return_games_played",
                "net_points_won",
                "winners",
                "unforced_errors",
                "service_points_won",
                "return_points_won",
                "total_points_won",
                "max_speed",
                "1st_serve_average_speed",
                "2nd_serve_average_speed",
            ]),
            percentage_columns: owned(&[
                "1st_serve",
                "1st_serve_points_won",
                "2nd_serve_points_won",
                "break_points_saved",
                "1st_serve_return_points_won",
                "2nd_serve_return_points_won",
                "break_points_converted",
                "net_points_won",
                "service_points_won",
                "return_points_won",
                "total_points_won",
            ]),
            renames: [
                ("1st_serve", "serve1"),
                ("1st_serve_pct", "serve1_pct"),
                ("1st_serve_points_won", "serve1_pts_won"),
                ("1st_serve_points_won_pct", "serve1_pts_won_pct"),
                ("2nd_serve_points_won", "serve2_pts_won"),
                ("2nd_serve_points_won_pct", "serve2_pts_won_pct"),
                ("1st_serve_return_points_won", "serve1_return_pts_won"),
                ("1st_serve_return_points_won_pct", "serve1_return_pts_won_pct"),
                ("2nd_serve_return_points_won", "serve2_return_pts_won"),
                ("2nd_serve_return_points_won_pct", "serve2_return_pts_won_pct"),
                ("1st_serve_average_speed", "serve1_avg_speed"),
                ("2nd_serve_average_speed", "serve2_avg_speed"),
            ]
            .into_iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect(),
            speed_columns: owned(&["max_speed", "serve1_avg_speed", "serve2_avg_speed"]),
            speed_cap: 300.0,
            missing_sentinel: -999,
        }
    }
}

impl ColumnMap {
    pub fn from_yaml_str(raw: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(raw).context("parsing column map")
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading column map {}", path.display()))?;
        Self::from_yaml_str(&raw).with_context(|| format!("in {}", path.display()))
    }

    pub fn rename<'a>(&'a self, name: &'a str) -> &'a str {
        self.renames.get(name).map(String::as_str).unwrap_or(name)
    }

    fn is_percentage(&self, name: &str) -> bool {
        self.percentage_columns.iter().any(|c| c == name)
    }
}

/// One decimal, ties to even. A zero denominator yields 0.
pub fn ratio_percentage(raw: &str) -> Option<f64> {
    let ratio = raw.split(' ').next()?;
    let (numerator, denominator) = ratio.split_once('/')?;
    let numerator: i64 = numerator.trim().parse().ok()?;
    let denominator: i64 = denominator.trim().parse().ok()?;
    if denominator == 0 {
        return Some(0.0);
    }
    let pct = numerator as f64 * 100.0 / denominator as f64;
    Some((pct * 10.0).round_ties_even() / 10.0)
}

fn scalar(raw: &str) -> FieldValue {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        FieldValue::Null
    } else if let Ok(int) = trimmed.parse::<i64>() {
        FieldValue::Int(int)
    } else if let Ok(float) = trimmed.parse::<f64>() {
        FieldValue::Float(float)
    } else {
        FieldValue::Text(trimmed.to_string())
    }
}

pub(crate) fn cell_text(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

fn object_field<'a>(
    value: &'a JsonValue,
    name: &str,
    data_type: DataType,
) -> Result<&'a JsonValue, NormalizeError> {
    value
        .get(name)
        .ok_or_else(|| NormalizeError::mismatch(data_type, format!("missing `{name}`")))
}

/// `players[i].player1Id` for both sides of the match.
fn player_ids(raw: &JsonValue, data_type: DataType) -> Result<[String; 2], NormalizeError> {
    player_ids_in(raw, "players", data_type)
}

fn player_ids_in(raw: &JsonValue, field: &str, data_type: DataType) -> Result<[String; 2], NormalizeError> {
    let players = object_field(raw, field, data_type)?
        .as_array()
        .ok_or_else(|| NormalizeError::mismatch(data_type, format!("`{field}` is not an array")))?;
    let ids: Vec<String> = players
        .iter()
        .filter_map(|p| p.get("player1Id").map(cell_text))
        .filter(|id| !id.is_empty())
        .collect();
    match <[String; 2]>::try_from(ids) {
        Ok(pair) => Ok(pair),
        Err(ids) => Err(NormalizeError::mismatch(
            data_type,
            format!("expected 2 player ids, found {}", ids.len()),
        )),
    }
}

/// Year, tournament, match and round of the artifact being normalized.
pub(crate) fn match_columns(ctx: &NormalizeContext, data_type: DataType) -> Result<StoredRecord, NormalizeError> {
    let match_id = ctx
        .key
        .match_id
        .clone()
        .ok_or_else(|| NormalizeError::mismatch(data_type, "context key has no match id"))?;
    Ok(StoredRecord::new()
        .with("year", ctx.key.year)
        .with("tournament_id", ctx.key.tournament_id.clone())
        .with("match_id", match_id)
        .with("round", ctx.round.clone()))
}

fn match_metadata(
    ctx: &NormalizeContext,
    data_type: DataType,
    sets_completed: i64,
    set_n: i64,
    player_id: &str,
    opponent_id: &str,
) -> Result<StoredRecord, NormalizeError> {
    Ok(match_columns(ctx, data_type)?
        .with("sets_completed", sets_completed)
        .with("set_n", set_n)
        .with("player_id", player_id)
        .with("opponent_id", opponent_id))
}

/// Stat name -> both players' raw cells, read positionally from the 2nd..4th
/// entry of each row object.
fn set_cells(
    rows: &[JsonValue],
    data_type: DataType,
) -> Result<BTreeMap<String, [String; 2]>, NormalizeError> {
    let mut cells = BTreeMap::new();
    for row in rows {
        let values: Vec<&JsonValue> = row
            .as_object()
            .map(|obj| obj.values())
            .ok_or_else(|| NormalizeError::mismatch(data_type, "set stat row is not an object"))?
            .collect();
        let [_, name, player1, player2, ..] = values.as_slice() else {
            return Err(NormalizeError::mismatch(
                data_type,
                format!("set stat row has {} cells, expected at least 4", values.len()),
            ));
        };
        let name = cell_text(name).to_lowercase().replace(' ', "_");
        cells.insert(name, [cell_text(player1), cell_text(player2)]);
    }
    Ok(cells)
}

/// Unreturned serves per player from a rally-analysis artifact: player 1's
/// are the opponent's `t2err` points and vice versa. Set 0 counts the whole match.
pub fn unreturned_serves(rally: &DecryptedArtifact, set_n: i64) -> Option<[i64; 2]> {
    let row = rally.value().get("rallyData")?.as_array()?.get(1)?;
    let prefix = format!("{set_n}_");
    let count = |column: &str| -> Option<i64> {
        let points = row.get(column)?.as_array()?;
        let n = points
            .iter()
            .filter_map(|p| p.get("pointId").and_then(JsonValue::as_str))
            .filter(|id| set_n == 0 || id.starts_with(&prefix))
            .count();
        i64::try_from(n).ok()
    };
    Some([count("t2err")?, count("t1err")?])
}

#[derive(Debug, Clone, Default)]
pub struct KeyStatsNormalizer {
    columns: ColumnMap,
}

impl KeyStatsNormalizer {
    pub fn new(columns: ColumnMap) -> Self {
        Self { columns }
    }

    fn stat_record(
        &self,
        mut record: StoredRecord,
        cells: &BTreeMap<String, [String; 2]>,
        side: usize,
        unreturned: Option<[i64; 2]>,
    ) -> StoredRecord {
        let cell = |name: &str| cells.get(name).map(|c| c[side].as_str()).unwrap_or("");

        for column in &self.columns.stat_columns {
            let raw = cell(column);
            if self.columns.is_percentage(column) {
                let ratio = raw.split(' ').next().unwrap_or_default();
                record.set(self.columns.rename(column), scalar(ratio));
                let pct_column = format!("{column}_pct");
                record.set(self.columns.rename(&pct_column), ratio_percentage(raw));
            } else {
                record.set(self.columns.rename(column), scalar(raw));
            }
        }

        let faced = cell("break_points_saved")
            .split(' ')
            .next()
            .and_then(|ratio| ratio.rsplit('/').next())
            .unwrap_or_default();
        record.set("break_points_faced", scalar(faced));
        record.set(
            "serves_unreturned",
            unreturned.map_or(self.columns.missing_sentinel, |u| u[side]),
        );

        for column in &self.columns.speed_columns {
            let too_fast = record
                .get(column)
                .and_then(FieldValue::as_f64)
                .is_some_and(|speed| speed.abs() > self.columns.speed_cap);
            if too_fast {
                record.set(column, self.columns.missing_sentinel);
            }
        }
        record
    }
}

impl RecordNormalizer for KeyStatsNormalizer {
    fn data_type(&self) -> DataType {
        DataType::KeyStats
    }

    fn table_spec(&self) -> TableSpec {
        let mut table = TableSpec::new(DataType::KeyStats.table())
            .key("year", ColumnType::Integer)
            .key("tournament_id", ColumnType::Text)
            .key("match_id", ColumnType::Text)
            .key("set_n", ColumnType::Integer)
            .key("player_id", ColumnType::Text)
            .column("round", ColumnType::Text)
            .column("sets_completed", ColumnType::Integer)
            .column("opponent_id", ColumnType::Text);
        for column in &self.columns.stat_columns {
            if self.columns.is_percentage(column) {
                let pct_column = format!("{column}_pct");
                table = table
                    .column(self.columns.rename(column), ColumnType::Text)
                    .column(self.columns.rename(&pct_column), ColumnType::Real);
            } else {
                table = table.column(self.columns.rename(column), ColumnType::Integer);
            }
            if column == "aces" {
                table = table.column("serves_unreturned", ColumnType::Integer);
            }
        }
        if !table.has_column("serves_unreturned") {
            table = table.column("serves_unreturned", ColumnType::Integer);
        }
        table.column("break_points_faced", ColumnType::Integer)
    }

    fn normalize(
        &self,
        data_type: DataType,
        artifact: &DecryptedArtifact,
        ctx: &NormalizeContext,
    ) -> Result<Vec<StoredRecord>, NormalizeError> {
        if data_type != DataType::KeyStats {
            return Err(NormalizeError::Unsupported(data_type));
        }
        let raw = artifact.value();
        let sets_completed = object_field(raw, "setsCompleted", data_type)?
            .as_i64()
            .ok_or_else(|| NormalizeError::mismatch(data_type, "`setsCompleted` is not an integer"))?;
        let [player, opponent] = player_ids(raw, data_type)?;
        let set_stats = object_field(raw, "setStats", data_type)?
            .as_object()
            .ok_or_else(|| NormalizeError::mismatch(data_type, "`setStats` is not an object"))?;
        let mut set_numbers: Vec<i64> = set_stats
            .keys()
            .filter_map(|name| name.strip_prefix("set")?.parse().ok())
            .filter(|set_n| (0..=sets_completed).contains(set_n))
            .collect();
        set_numbers.sort_unstable();

        let mut records = Vec::new();
        for set_n in set_numbers {
            let rows = match set_stats.get(&format!("set{set_n}")).and_then(JsonValue::as_array) {
                Some(rows) if !rows.is_empty() => rows,
                _ => {
                    // setsCompleted has been seen to overcount by one
                    debug!(key = %ctx.key, set_n, "no stats for set");
                    continue;
                }
            };
            let cells = set_cells(rows, data_type)?;
            let unreturned = match &ctx.rally_analysis {
                Some(rally) => {
                    let counts = unreturned_serves(rally, set_n);
                    if counts.is_none() {
                        warn!(key = %ctx.key, set_n, "rally-analysis layout unreadable; unreturned serves unknown");
                    }
                    counts
                }
                None => None,
            };

            for (side, (player_id, opponent_id)) in
                [(&player, &opponent), (&opponent, &player)].into_iter().enumerate()
            {
                let base = match_metadata(ctx, data_type, sets_completed, set_n, player_id, opponent_id)?;
                records.push(self.stat_record(base, &cells, side, unreturned));
            }
        }
        Ok(records)
    }
}

/// Rally-length breakdown: one row per point, attributed to the player the
/// point is credited to. Matches whose rallies are mostly uncategorised are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct RallyAnalysisNormalizer;

/// `(column, player slot, outcome)` of each rally-data list.
const RALLY_OUTCOMES: [(&str, usize, &str); 4] = [
    ("t1win", 0, "W"),
    ("t1err", 0, "L"),
    ("t2win", 1, "W"),
    ("t2err", 1, "L"),
];

const RALLY_POINT_COLUMNS: [(&str, ColumnType); 18] = [
    ("crucial_point", ColumnType::Integer),
    ("score", ColumnType::Text),
    ("hand", ColumnType::Text),
    ("point_end_type", ColumnType::Text),
    ("serve", ColumnType::Integer),
    ("serve_dir", ColumnType::Text),
    ("court_side", ColumnType::Text),
    ("serve_speed", ColumnType::Integer),
    ("set_n", ColumnType::Integer),
    ("game", ColumnType::Text),
    ("point", ColumnType::Text),
    ("shot_type", ColumnType::Text),
    ("p1_break_point", ColumnType::Integer),
    ("p2_break_point", ColumnType::Integer),
    ("p1_net_point", ColumnType::Integer),
    ("p2_net_point", ColumnType::Integer),
    ("tie_break", ColumnType::Integer),
    ("set_point", ColumnType::Integer),
];

/// Share of categorised rallies below which a match is not stored, in tenths.
const MIN_KNOWN_RALLY_TENTHS: usize = 9;

/// Rows 1-8 are exact rally lengths, 9 and 10 are the odd/even open-ended
/// buckets, anything after is uncategorised.
fn shot_number_label(shot: usize) -> Option<String> {
    match shot {
        1..=8 => Some(shot.to_string()),
        9 => Some("9+_odd".to_string()),
        10 => Some("10+_even".to_string()),
        _ => None,
    }
}

/// `t1BreakPoint` -> `p1_break_point`, `pointEndType` -> `point_end_type`, `set` -> `set_n`.
pub fn rally_column_name(raw: &str) -> String {
    let mut snake = String::with_capacity(raw.len() + 4);
    let mut prev_lower = false;
    for ch in raw.chars() {
        if ch.is_ascii_uppercase() && prev_lower {
            snake.push('_');
        }
        prev_lower = ch.is_ascii_lowercase();
        snake.push(ch.to_ascii_lowercase());
    }
    if snake == "set" {
        return "set_n".to_string();
    }
    if snake.starts_with("t1") || snake.starts_with("t2") {
        return format!("p{}_{}", &snake[1..2], &snake[2..]);
    }
    snake
}

impl RallyAnalysisNormalizer {
    fn point_record(
        base: &StoredRecord,
        point: &JsonValue,
        shot_number: Option<&str>,
        outcome: &str,
        players: (&str, &str),
        data_type: DataType,
    ) -> Result<StoredRecord, NormalizeError> {
        let fields = point
            .as_object()
            .ok_or_else(|| NormalizeError::mismatch(data_type, "rally point is not an object"))?;
        let point_id = fields
            .get("pointId")
            .map(cell_text)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| NormalizeError::mismatch(data_type, "rally point without `pointId`"))?;

        let mut record = base.clone();
        for (name, value) in fields {
            let column = rally_column_name(name);
            if RALLY_POINT_COLUMNS.iter().any(|(c, _)| *c == column) {
                record.set(&column, FieldValue::from_json(value));
            }
        }
        let mut parts = point_id.split('_');
        record.set("game", parts.nth(1));
        record.set("point", parts.next());
        record.set("point_id", point_id.as_str());
        record.set("shot_number", shot_number);

        // double faults are listed as the receiver's win
        let (player, opponent) = players;
        let double_fault = fields
            .get("pointEndType")
            .and_then(JsonValue::as_str)
            .is_some_and(|t| t.eq_ignore_ascii_case("DOUBLE FAULT"));
        if outcome == "W" && double_fault {
            record.set("outcome", "L");
            record.set("player_id", opponent);
            record.set("opponent_id", player);
        } else {
            record.set("outcome", outcome);
            record.set("player_id", player);
            record.set("opponent_id", opponent);
        }
        Ok(record)
    }
}

impl RecordNormalizer for RallyAnalysisNormalizer {
    fn data_type(&self) -> DataType {
        DataType::RallyAnalysis
    }

    fn table_spec(&self) -> TableSpec {
        let mut table = TableSpec::new(DataType::RallyAnalysis.table())
            .key("year", ColumnType::Integer)
            .key("tournament_id", ColumnType::Text)
            .key("match_id", ColumnType::Text)
            .key("point_id", ColumnType::Text)
            .column("round", ColumnType::Text)
            .column("sets_completed", ColumnType::Integer)
            .column("shot_number", ColumnType::Text)
            .column("outcome", ColumnType::Text)
            .column("player_id", ColumnType::Text)
            .column("opponent_id", ColumnType::Text);
        for (column, column_type) in RALLY_POINT_COLUMNS {
            table = table.column(column, column_type);
        }
        table
    }

    fn normalize(
        &self,
        data_type: DataType,
        artifact: &DecryptedArtifact,
        ctx: &NormalizeContext,
    ) -> Result<Vec<StoredRecord>, NormalizeError> {
        if data_type != DataType::RallyAnalysis {
            return Err(NormalizeError::Unsupported(data_type));
        }
        let raw = artifact.value();
        let players = player_ids_in(raw, "playerDetails", data_type)?;
        let rows = object_field(raw, "rallyData", data_type)?
            .as_array()
            .ok_or_else(|| NormalizeError::mismatch(data_type, "`rallyData` is not an array"))?;
        let base = match_columns(ctx, data_type)?
            .with("sets_completed", raw.get("setsCompleted").and_then(JsonValue::as_i64));

        let mut known = Vec::new();
        let mut unknown = 0usize;
        for (idx, row) in rows.iter().enumerate() {
            let shot_number = shot_number_label(idx + 1);
            for (column, slot, outcome) in RALLY_OUTCOMES {
                let Some(points) = row.get(column).and_then(JsonValue::as_array) else {
                    continue;
                };
                let pair = (players[slot].as_str(), players[1 - slot].as_str());
                for point in points {
                    let record =
                        Self::point_record(&base, point, shot_number.as_deref(), outcome, pair, data_type)?;
                    if shot_number.is_some() {
                        known.push(record);
                    } else {
                        unknown += 1;
                    }
                }
            }
        }

        let total = known.len() + unknown;
        if known.len() * 10 < total * MIN_KNOWN_RALLY_TENTHS {
            debug!(key = %ctx.key, known = known.len(), total, "too few categorised rallies; not stored");
            return Ok(Vec::new());
        }
        Ok(known)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StrokeAnalysisNormalizer;

const STROKE_COUNTS: [(&str, &str); 4] = [
    ("Wins", "winners"),
    ("Frcs", "errors"),
    ("Unfs", "unforced_errors"),
    ("Others", "others"),
];

impl RecordNormalizer for StrokeAnalysisNormalizer {
    fn data_type(&self) -> DataType {
        DataType::StrokeAnalysis
    }

    fn table_spec(&self) -> TableSpec {
        TableSpec::new(DataType::StrokeAnalysis.table())
            .key("year", ColumnType::Integer)
            .key("tournament_id", ColumnType::Text)
            .key("match_id", ColumnType::Text)
            .key("set_n", ColumnType::Integer)
            .key("player_id", ColumnType::Text)
            .key("hand", ColumnType::Text)
            .key("shot_type", ColumnType::Text)
            .column("round", ColumnType::Text)
            .column("sets_completed", ColumnType::Integer)
            .column("opponent_id", ColumnType::Text)
            .column("winners", ColumnType::Integer)
            .column("errors", ColumnType::Integer)
            .column("unforced_errors", ColumnType::Integer)
            .column("others", ColumnType::Integer)
    }

    fn normalize(
        &self,
        data_type: DataType,
        artifact: &DecryptedArtifact,
        ctx: &NormalizeContext,
    ) -> Result<Vec<StoredRecord>, NormalizeError> {
        if data_type != DataType::StrokeAnalysis {
            return Err(NormalizeError::Unsupported(data_type));
        }
        let raw = artifact.value();
        let [player1, player2] = player_ids(raw, data_type)?;
        let sets = object_field(raw, "rallyShots", data_type)?
            .get("allPoints")
            .and_then(JsonValue::as_array)
            .filter(|sets| !sets.is_empty())
            .ok_or_else(|| NormalizeError::mismatch(data_type, "missing `rallyShots.allPoints`"))?;
        // setsCompleted is unreliable here; the per-set array is authoritative
        let sets_completed = i64::try_from(sets.len() - 1).unwrap_or_default();

        let hand_shots = |set: &JsonValue, hand: &str| -> Result<Vec<JsonValue>, NormalizeError> {
            set.get(hand)
                .and_then(JsonValue::as_array)
                .cloned()
                .ok_or_else(|| NormalizeError::mismatch(data_type, format!("set without `{hand}` shots")))
        };

        let mut records = Vec::new();
        let mut any_activity = false;
        for (set_n, set) in sets.iter().enumerate() {
            let set_n = i64::try_from(set_n).unwrap_or_default();
            for (slot, (player_id, opponent_id)) in PLAYER_SLOTS
                .iter()
                .zip([(&player1, &player2), (&player2, &player1)])
            {
                for hand in HANDS {
                    let names = hand_shots(&sets[0], hand)?;
                    for (idx, shot) in hand_shots(set, hand)?.iter().enumerate() {
                        let shot_type = names
                            .get(idx)
                            .and_then(|n| n.get("name"))
                            .or_else(|| shot.get("name"))
                            .map(cell_text)
                            .filter(|name| !name.is_empty())
                            .ok_or_else(|| NormalizeError::mismatch(data_type, "shot without a name"))?;

                        let mut record =
                            match_metadata(ctx, data_type, sets_completed, set_n, player_id, opponent_id)?
                                .with("hand", hand)
                                .with("shot_type", shot_type);
                        for (suffix, column) in STROKE_COUNTS {
                            let value = shot
                                .get(format!("{slot}{suffix}"))
                                .map(|v| scalar(&cell_text(v)))
                                .unwrap_or_default();
                            any_activity |= value.as_i64().is_some_and(|n| n != 0);
                            record.set(column, value);
                        }
                        records.push(record);
                    }
                }
            }
        }

        if !any_activity {
            debug!(key = %ctx.key, "stroke analysis has no recorded shots");
            return Ok(Vec::new());
        }
        Ok(records)
    }
}
