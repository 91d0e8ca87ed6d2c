//! Court-vision ball tracking: one row per stroke of every tracked point.

use std::collections::{BTreeMap, BTreeSet};

use matchstats_core::{ColumnType, DataType, DecryptedArtifact, FieldValue, StoredRecord, TableSpec};
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::debug;

use crate::normalize::{cell_text, match_columns};
use crate::{NormalizeContext, NormalizeError, RecordNormalizer};

const SENTINEL: i64 = -999;

/// Anonymised point keys and the columns they feed.
const POINT_KEYS: [(&str, &str); 20] = [
    ("a81", "point_id"),
    ("a13", "server_id"),
    ("a14", "scorer_id"),
    ("a15", "receiver_id"),
    ("a21", "ball_speed_kmh"),
    ("a93", "rally_length"),
    ("a94", "rally_length_werr"),
    ("a95", "point_end_type"),
    ("a25", "stroke_type"),
    ("a96", "serve_type"),
    ("a97", "court"),
    ("a98", "set_n"),
    ("a99", "set"),
    ("a100", "game"),
    ("a101", "point"),
    ("a102", "serve"),
    ("a103", "hand"),
    ("a104", "break_point"),
    ("a105", "break_point_converted"),
    ("a12", "trajectory_data"),
];

const MATCH_SCORE_KEY: &str = "a35";
const PLAYER_ID_KEY: &str = "a86";
const P1_GAME_SCORE_KEY: &str = "a142";
const P2_GAME_SCORE_KEY: &str = "a143";

const TEXT_COLUMNS: [&str; 9] = [
    "point_id",
    "server_id",
    "scorer_id",
    "receiver_id",
    "point_end_type",
    "stroke_type",
    "serve_type",
    "court",
    "hand",
];

/// Trajectory positions in column order; the first and second `peak` of a
/// stroke are `peak_pre` and `peak_post`.
const TRAJECTORY_POSITIONS: [&str; 5] = ["hit", "peak_pre", "net", "bounce", "peak_post"];

/// Tournaments whose sets go to a tiebreak at 3-3.
const SHORT_SET_TOURNAMENTS: [&str; 1] = ["7696"];

/// Positional layout of `courtVisionData[0]`; its keys are anonymised.
const POINTS_SECTION: usize = 4;
const PLAYERS_SECTION: usize = 5;

fn point_key(column: &str) -> Option<&'static str> {
    POINT_KEYS.iter().find(|(_, c)| *c == column).map(|(key, _)| *key)
}

fn point_field<'a>(point: &'a JsonMap<String, JsonValue>, column: &str) -> Option<&'a JsonValue> {
    point.get(point_key(column)?)
}

fn int_cell(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn float_cell(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        // "187 km/h" and friends
        JsonValue::String(s) => s.split(' ').next()?.trim().parse().ok(),
        _ => None,
    }
}

fn text_cell(value: Option<&JsonValue>) -> Option<String> {
    value.map(cell_text).filter(|s| !s.is_empty())
}

struct TrackedPoint<'a> {
    fields: &'a JsonMap<String, JsonValue>,
    point_id: String,
    set_n: i64,
    order: [i64; 4],
    rally_length: i64,
}

impl<'a> TrackedPoint<'a> {
    /// `None` when any of the ordering columns is missing or "NA".
    fn parse(fields: &'a JsonMap<String, JsonValue>) -> Option<Self> {
        let int = |column: &str| point_field(fields, column).and_then(int_cell);
        point_field(fields, "rally_length_werr").and_then(int_cell)?;
        Some(Self {
            fields,
            point_id: text_cell(point_field(fields, "point_id"))?,
            set_n: int("set_n")?,
            order: [int("set")?, int("game")?, int("point")?, int("serve")?],
            rally_length: int("rally_length")?,
        })
    }

    fn score(&self, column_code: &str) -> Option<String> {
        text_cell(self.fields.get(MATCH_SCORE_KEY)?.get(column_code))
    }

    /// `a122..a126` hold player 1's games per set, `a132..a136` player 2's.
    fn set_games(&self, player: usize, set_n: i64) -> Option<String> {
        if !(1..=5).contains(&set_n) {
            return None;
        }
        let code = 121 + set_n + if player == 0 { 0 } else { 10 };
        self.score(&format!("a{code}"))
    }
}

/// Sets won before this point, the current set's games, game score and tiebreak flag.
fn score_columns(point: &TrackedPoint<'_>, tournament_id: &str, ends_set: bool) -> StoredRecord {
    let games = |player: usize, set_n: i64| -> Option<i64> { point.set_games(player, set_n)?.parse().ok() };

    let mut sets_won = Some([0i64, 0]);
    for set_n in 1..point.set_n {
        let (Some(p1), Some(p2)) = (games(0, set_n), games(1, set_n)) else {
            sets_won = None;
            break;
        };
        if let Some(won) = sets_won.as_mut() {
            if p1 > p2 {
                won[0] += 1;
            } else if p1 < p2 {
                won[1] += 1;
            }
        }
    }

    let p1_game = point.score(P1_GAME_SCORE_KEY);
    let p2_game = point.score(P2_GAME_SCORE_KEY);
    if ends_set {
        if let Some(won) = sets_won.as_mut() {
            let winner = usize::from(p1_game.as_deref() != Some("GAME"));
            won[winner] += 1;
        }
    }

    let (tiebreak_at, tiebreak_won) = if SHORT_SET_TOURNAMENTS.contains(&tournament_id) {
        ("3", "4")
    } else {
        ("6", "7")
    };
    let p1_set = point.set_games(0, point.set_n);
    let p2_set = point.set_games(1, point.set_n);
    let is_tiebreak = match (p1_set.as_deref(), p2_set.as_deref()) {
        (Some(a), Some(b)) if (a == tiebreak_won && b == tiebreak_at) || (a == tiebreak_at && b == tiebreak_won) => true,
        // a "GAME" here is the point that just closed the set before the tiebreak
        (Some(a), Some(b)) if a == tiebreak_at && b == tiebreak_at => {
            p1_game.as_deref() != Some("GAME") && p2_game.as_deref() != Some("GAME")
        }
        _ => false,
    };

    let [p1_sets_w, p2_sets_w] = sets_won.unwrap_or([SENTINEL, SENTINEL]);
    let set_score = |raw: Option<String>| raw.and_then(|g| g.parse::<i64>().ok()).unwrap_or(SENTINEL);
    StoredRecord::new()
        .with("p1_sets_w", p1_sets_w)
        .with("p2_sets_w", p2_sets_w)
        .with("p1_set_score", set_score(p1_set))
        .with("p2_set_score", set_score(p2_set))
        .with("p1_game_score", p1_game)
        .with("p2_game_score", p2_game)
        .with("is_tiebreak", i64::from(is_tiebreak))
}

type Coordinates = [Option<f64>; 3];

/// Splits a point's trajectory into strokes at every `hit`, keeping the first
/// sample of each position per stroke. An untracked point yields one empty stroke.
fn strokes(trajectory: Option<&JsonValue>) -> Vec<BTreeMap<&'static str, Coordinates>> {
    let samples = trajectory.and_then(JsonValue::as_array).map(Vec::as_slice).unwrap_or_default();
    let mut strokes: Vec<BTreeMap<&'static str, Coordinates>> = Vec::new();
    let mut peaks_seen = 0;
    for sample in samples {
        let position = sample.get("a73").and_then(JsonValue::as_str).unwrap_or_default();
        if position == "hit" || strokes.is_empty() {
            strokes.push(BTreeMap::new());
            peaks_seen = 0;
        }
        let label = match position {
            "hit" => "hit",
            "net" => "net",
            "bounce" => "bounce",
            "peak" => {
                peaks_seen += 1;
                match peaks_seen {
                    1 => "peak_pre",
                    2 => "peak_post",
                    _ => continue,
                }
            }
            _ => continue,
        };
        let coord = |key: &str| sample.get(key).and_then(float_cell);
        if let Some(stroke) = strokes.last_mut() {
            stroke.entry(label).or_insert([coord("a70"), coord("a71"), coord("a72")]);
        }
    }
    if strokes.is_empty() {
        strokes.push(BTreeMap::new());
    }
    strokes
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CourtVisionNormalizer;

impl CourtVisionNormalizer {
    fn points<'a>(
        data: &'a JsonMap<String, JsonValue>,
        data_type: DataType,
    ) -> Result<Vec<&'a JsonMap<String, JsonValue>>, NormalizeError> {
        let section = data
            .values()
            .nth(POINTS_SECTION)
            .and_then(JsonValue::as_object)
            .ok_or_else(|| NormalizeError::mismatch(data_type, "points section is not an object"))?;
        let mut points = Vec::new();
        for entry in section.values() {
            match entry {
                JsonValue::Object(point) => points.push(point),
                JsonValue::Array(list) => points.extend(list.iter().filter_map(JsonValue::as_object)),
                _ => return Err(NormalizeError::mismatch(data_type, "point entry is not an object")),
            }
        }
        Ok(points)
    }

    fn player_ids(data: &JsonMap<String, JsonValue>, data_type: DataType) -> Result<[String; 2], NormalizeError> {
        let ids: Vec<String> = data
            .values()
            .nth(PLAYERS_SECTION)
            .and_then(JsonValue::as_object)
            .map(|players| {
                players
                    .values()
                    .filter_map(|p| text_cell(p.get(0).and_then(|first| first.get(PLAYER_ID_KEY))))
                    .collect()
            })
            .unwrap_or_default();
        <[String; 2]>::try_from(ids).map_err(|ids| {
            NormalizeError::mismatch(data_type, format!("expected 2 court-vision players, found {}", ids.len()))
        })
    }
}

impl RecordNormalizer for CourtVisionNormalizer {
    fn data_type(&self) -> DataType {
        DataType::CourtVision
    }

    fn table_spec(&self) -> TableSpec {
        let mut table = TableSpec::new(DataType::CourtVision.table())
            .key("year", ColumnType::Integer)
            .key("tournament_id", ColumnType::Text)
            .key("match_id", ColumnType::Text)
            .key("set_n", ColumnType::Integer)
            .key("game", ColumnType::Integer)
            .key("point", ColumnType::Integer)
            .key("serve", ColumnType::Integer)
            .key("stroke_idx", ColumnType::Integer)
            .column("round", ColumnType::Text)
            .column("p1_id", ColumnType::Text)
            .column("p2_id", ColumnType::Text)
            .column("ball_speed_kmh", ColumnType::Real)
            .column("rally_length", ColumnType::Integer)
            .column("break_point", ColumnType::Integer)
            .column("break_point_converted", ColumnType::Integer)
            .column("p1_sets_w", ColumnType::Integer)
            .column("p2_sets_w", ColumnType::Integer)
            .column("p1_set_score", ColumnType::Integer)
            .column("p2_set_score", ColumnType::Integer)
            .column("p1_game_score", ColumnType::Text)
            .column("p2_game_score", ColumnType::Text)
            .column("is_tiebreak", ColumnType::Integer);
        for column in TEXT_COLUMNS {
            table = table.column(column, ColumnType::Text);
        }
        for position in TRAJECTORY_POSITIONS {
            for axis in ["x", "y", "z"] {
                table = table.column(&format!("{axis}_{position}"), ColumnType::Real);
            }
        }
        table
    }

    fn normalize(
        &self,
        data_type: DataType,
        artifact: &DecryptedArtifact,
        ctx: &NormalizeContext,
    ) -> Result<Vec<StoredRecord>, NormalizeError> {
        if data_type != DataType::CourtVision {
            return Err(NormalizeError::Unsupported(data_type));
        }
        let data = artifact
            .value()
            .get("courtVisionData")
            .and_then(|d| d.get(0))
            .and_then(JsonValue::as_object)
            .ok_or_else(|| NormalizeError::mismatch(data_type, "missing `courtVisionData[0]`"))?;
        let [p1_id, p2_id] = Self::player_ids(data, data_type)?;

        let raw_points = Self::points(data, data_type)?;
        let mut points: Vec<TrackedPoint<'_>> = raw_points.iter().copied().filter_map(TrackedPoint::parse).collect();
        if points.len() < raw_points.len() {
            debug!(key = %ctx.key, dropped = raw_points.len() - points.len(), "untracked points skipped");
        }
        if points.is_empty() {
            debug!(key = %ctx.key, "no tracked points");
            return Ok(Vec::new());
        }
        points.sort_by_key(|p| p.order);

        let mut last_of_set: BTreeMap<i64, &str> = BTreeMap::new();
        for point in &points {
            last_of_set.insert(point.set_n, point.point_id.as_str());
        }
        let set_ends: BTreeSet<&str> = last_of_set.into_values().collect();

        let base = match_columns(ctx, data_type)?
            .with("p1_id", p1_id.as_str())
            .with("p2_id", p2_id.as_str());
        let mut records = Vec::new();
        for point in &points {
            let mut row = base.clone();
            for column in TEXT_COLUMNS {
                row.set(column, text_cell(point_field(point.fields, column)));
            }
            let [_, game, point_n, serve] = point.order;
            row.set("set_n", point.set_n);
            row.set("game", game);
            row.set("point", point_n);
            row.set("serve", serve);
            row.set("rally_length", point.rally_length);
            row.set("ball_speed_kmh", point_field(point.fields, "ball_speed_kmh").and_then(float_cell));
            for flag in ["break_point", "break_point_converted"] {
                row.set(flag, point_field(point.fields, flag).map(FieldValue::from_json));
            }
            let ends_set = set_ends.contains(point.point_id.as_str());
            for (column, value) in score_columns(point, &ctx.key.tournament_id, ends_set).fields {
                row.set(&column, value);
            }

            for (idx, stroke) in strokes(point_field(point.fields, "trajectory_data")).into_iter().enumerate() {
                let mut record = row.clone().with("stroke_idx", i64::try_from(idx + 1).unwrap_or(SENTINEL));
                for position in TRAJECTORY_POSITIONS {
                    let coords = stroke.get(position).copied().unwrap_or_default();
                    for (axis, value) in ["x", "y", "z"].into_iter().zip(coords) {
                        record.set(&format!("{axis}_{position}"), value.unwrap_or(SENTINEL as f64));
                    }
                }
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matchstats_core::NaturalKey;
    use serde_json::json;

    fn sample(x: f64, y: f64, z: f64, position: &str) -> JsonValue {
        json!({"a70": x, "a71": y, "a72": z, "a73": position})
    }

    fn point(id: &str, order: [&str; 4], p1_games: &str, p2_games: &str, game_score: [&str; 2], trajectory: JsonValue) -> JsonValue {
        json!({
            "a81": id, "a13": "S0AG", "a14": "S0AG", "a15": "DH58",
            "a21": "187 km/h", "a93": "3", "a94": "3", "a95": "Winner", "a25": "Forehand",
            "a96": "Flat", "a97": "Deuce", "a98": order[0], "a99": order[0], "a100": order[1],
            "a101": order[2], "a102": order[3], "a103": "R", "a104": false, "a105": false,
            "a12": trajectory,
            "a35": {"a122": p1_games, "a132": p2_games, "a142": game_score[0], "a143": game_score[1]}
        })
    }

    fn doc(points: Vec<JsonValue>) -> DecryptedArtifact {
        DecryptedArtifact::new(json!({"courtVisionData": [{
            "b1": true, "b2": "ATP", "b3": "Centre", "b4": 1,
            "b5": {"1": points},
            "b6": {"p1": [{"a86": "S0AG"}], "p2": [{"a86": "DH58"}]},
            "b7": {}, "b8": 1, "b9": "1_1_2", "b10": "F"
        }]}))
    }

    fn ctx() -> NormalizeContext {
        NormalizeContext::new(NaturalKey::for_match(2024, "407", "MS001").unwrap()).with_round(Some("Final".into()))
    }

    #[test]
    fn court_vision_emits_one_row_per_stroke() {
        let rally = json!([
            sample(1.0, 2.0, 0.5, "hit"),
            sample(3.0, 4.0, 2.5, "peak"),
            sample(5.0, 6.0, 1.0, "net"),
            sample(7.0, 8.0, 0.0, "bounce"),
            sample(7.5, 8.5, 0.9, "peak"),
            sample(9.0, 9.5, 1.1, "hit"),
            sample(0.0, 0.1, 1.0, "net")
        ]);
        let untracked = point("1_1_1", ["1", "1", "1", "1"], "0", "0", ["15", "0"], json!([]));
        let tracked = point("1_1_2", ["1", "1", "2", "2"], "6", "4", ["GAME", "30"], rally);
        let mut bad = point("1_1_3", ["1", "1", "3", "1"], "0", "0", ["0", "0"], json!([]));
        bad["a93"] = json!("NA");

        let normalizer = CourtVisionNormalizer;
        let records = normalizer
            .normalize(DataType::CourtVision, &doc(vec![tracked, bad, untracked]), &ctx())
            .unwrap();
        assert_eq!(records.len(), 3);
        let table = normalizer.table_spec();
        assert!(records.iter().all(|r| table.validate(r).is_ok()));

        // sorted by set, game, point, serve
        let first = &records[0];
        assert_eq!(first.get("point_id"), Some(&FieldValue::from("1_1_1")));
        assert_eq!(first.get("x_hit"), Some(&FieldValue::Float(-999.0)));
        assert_eq!(first.get("p1_sets_w"), Some(&FieldValue::Int(0)));

        let serve = &records[1];
        assert_eq!(serve.get("stroke_idx"), Some(&FieldValue::Int(1)));
        assert_eq!(serve.get("z_peak_pre"), Some(&FieldValue::Float(2.5)));
        assert_eq!(serve.get("y_peak_post"), Some(&FieldValue::Float(8.5)));
        assert_eq!(serve.get("ball_speed_kmh"), Some(&FieldValue::Float(187.0)));
        assert_eq!(serve.get("p1_id"), Some(&FieldValue::from("S0AG")));
        assert_eq!(serve.get("break_point"), Some(&FieldValue::Int(0)));
        // last tracked point of set 1, won by player 1
        assert_eq!(serve.get("p1_sets_w"), Some(&FieldValue::Int(1)));
        assert_eq!(serve.get("p1_set_score"), Some(&FieldValue::Int(6)));

        let second_stroke = &records[2];
        assert_eq!(second_stroke.get("stroke_idx"), Some(&FieldValue::Int(2)));
        assert_eq!(second_stroke.get("x_net"), Some(&FieldValue::Float(0.0)));
        assert_eq!(second_stroke.get("x_bounce"), Some(&FieldValue::Float(-999.0)));
    }

    #[test]
    fn tiebreaks_follow_the_set_score() {
        let at_six_all = point("1_13_1", ["1", "13", "1", "1"], "6", "6", ["1", "0"], json!([]));
        let after_set = point("1_12_4", ["1", "12", "4", "1"], "6", "6", ["GAME", "40"], json!([]));
        let records = CourtVisionNormalizer
            .normalize(DataType::CourtVision, &doc(vec![at_six_all, after_set]), &ctx())
            .unwrap();
        assert_eq!(records[0].get("is_tiebreak"), Some(&FieldValue::Int(0)));
        assert_eq!(records[1].get("is_tiebreak"), Some(&FieldValue::Int(1)));
    }

    #[test]
    fn earlier_sets_count_towards_sets_won() {
        let mut second_set = point("2_1_1", ["2", "1", "1", "1"], "6", "3", ["15", "0"], json!([]));
        second_set["a35"]["a123"] = json!("1");
        second_set["a35"]["a133"] = json!("0");
        let mut third = point("2_1_2", ["2", "1", "2", "1"], "6", "3", ["30", "0"], json!([]));
        third["a35"]["a123"] = json!("1");
        third["a35"]["a133"] = json!("0");
        let records = CourtVisionNormalizer
            .normalize(DataType::CourtVision, &doc(vec![second_set, third]), &ctx())
            .unwrap();
        assert_eq!(records[0].get("p1_sets_w"), Some(&FieldValue::Int(1)));
        assert_eq!(records[0].get("p1_set_score"), Some(&FieldValue::Int(1)));
        // set 2 closes on the last tracked point, credited to player 2 without a "GAME" for player 1
        assert_eq!(records[1].get("p2_sets_w"), Some(&FieldValue::Int(1)));
    }

    #[test]
    fn empty_court_vision_is_a_schema_mismatch() {
        let err = CourtVisionNormalizer
            .normalize(DataType::CourtVision, &DecryptedArtifact::new(json!({"courtVisionData": []})), &ctx())
            .unwrap_err();
        assert!(matches!(err, NormalizeError::SchemaMismatch { .. }));
    }
}
