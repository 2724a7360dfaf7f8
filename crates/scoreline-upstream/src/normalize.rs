//! Defensive payload search and normalization to live fields.
//!
//! Provider responses wrap the event of interest in arrays or keyed objects
//! whose shape varies between endpoints. Nothing here assumes position: the
//! requested event is located by id.

use std::collections::VecDeque;

use scoreline_core::{derive_minute, EventStatus, FieldUpdate, FieldValue, PhaseKickoffs};
use serde_json::Value;

/// Keys that may carry an event's external id.
const ID_KEYS: &[&str] = &["id", "externalId", "external_id", "eventId", "event_id", "matchId"];

/// How deep to look into nested wrappers.
const MAX_DEPTH: usize = 6;

/// Epoch values above this are milliseconds.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

fn id_matches(node: &Value, id: &str) -> bool {
    let Some(obj) = node.as_object() else {
        return false;
    };
    ID_KEYS.iter().any(|key| match obj.get(*key) {
        Some(Value::String(s)) => s == id,
        Some(Value::Number(n)) => n.to_string() == id,
        _ => false,
    })
}

/// Find the node describing event `id` anywhere in `payload`.
///
/// Breadth-first, so the shallowest match wins over nested ids (teams,
/// venues) that happen to collide.
pub fn find_event<'a>(payload: &'a Value, id: &str) -> Option<&'a Value> {
    let mut queue = VecDeque::from([(payload, 0usize)]);
    while let Some((node, depth)) = queue.pop_front() {
        if id_matches(node, id) {
            return Some(node);
        }
        if depth >= MAX_DEPTH {
            continue;
        }
        match node {
            Value::Array(items) => queue.extend(items.iter().map(|v| (v, depth + 1))),
            Value::Object(map) => queue.extend(map.values().map(|v| (v, depth + 1))),
            _ => {}
        }
    }
    None
}

/// Extract event ids from a change-feed payload: a bare array of ids, an
/// array of objects, or either wrapped under `changes`/`events`/`data`.
pub fn collect_ids(payload: &Value) -> Vec<String> {
    let items = match payload {
        Value::Array(items) => items,
        Value::Object(map) => {
            match ["changes", "events", "data"]
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_array))
            {
                Some(items) => items,
                None => return Vec::new(),
            }
        }
        _ => return Vec::new(),
    };

    let mut ids = Vec::new();
    for item in items {
        let id = match item {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Object(obj) => ID_KEYS.iter().find_map(|k| match obj.get(*k) {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            }),
            _ => None,
        };
        if let Some(id) = id {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

/// Map a provider status code or name onto the lifecycle.
///
/// Unknown codes return `None`; guessing a status would poison the record.
pub fn map_status(raw: &str) -> Option<EventStatus> {
    let code = raw.trim().to_ascii_uppercase().replace([' ', '-'], "_");
    let status = match code.as_str() {
        "NS" | "NOT_STARTED" | "NOTSTARTED" | "SCHEDULED" | "TBD" => EventStatus::NotStarted,
        "1H" | "FIRST_HALF" | "1ST_HALF" | "PHASE_1" => EventStatus::Phase1,
        "HT" | "HALFTIME" | "HALF_TIME" | "INTERMISSION" | "PAUSE" => EventStatus::Intermission,
        "2H" | "SECOND_HALF" | "2ND_HALF" | "PHASE_2" => EventStatus::Phase2,
        "ET" | "BT" | "EXTRA_TIME" | "OVERTIME" | "AWAITING_EXTRA_TIME" => EventStatus::ExtraTime,
        "P" | "PENALTIES" | "SHOOTOUT" | "PEN_LIVE" => EventStatus::Shootout,
        "FT" | "AET" | "PEN" | "AP" | "ENDED" | "FINISHED" | "AFTER_PENALTIES" => {
            EventStatus::Ended
        }
        "PST" | "POSTPONED" | "DELAYED" | "DLY" => EventStatus::Delayed,
        "INT" | "SUSP" | "INTERRUPTED" | "SUSPENDED" => EventStatus::Interrupted,
        _ => return None,
    };
    Some(status)
}

fn status_of(event: &Value) -> Option<EventStatus> {
    match event.get("status")? {
        Value::String(s) => map_status(s),
        Value::Object(obj) => ["short", "code", "type", "description", "long"]
            .iter()
            .filter_map(|k| obj.get(*k).and_then(Value::as_str))
            .find_map(map_status),
        _ => None,
    }
}

fn as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn at<'a>(event: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(event, |node, key| node.get(*key))
}

fn int_at(event: &Value, paths: &[&[&str]]) -> Option<i64> {
    paths
        .iter()
        .find_map(|p| at(event, p).and_then(as_i64))
}

fn score_at(event: &Value, paths: &[&[&str]]) -> Option<i32> {
    int_at(event, paths).and_then(|v| i32::try_from(v).ok())
}

/// Epoch seconds from a number (seconds or milliseconds) or an RFC 3339 string.
fn timestamp_at(event: &Value, paths: &[&[&str]]) -> Option<i64> {
    paths.iter().find_map(|p| {
        let v = at(event, p)?;
        if let Some(s) = v.as_str() {
            if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
                return Some(dt.timestamp());
            }
        }
        let raw = as_i64(v)?;
        let secs = if raw > MILLIS_THRESHOLD { raw / 1_000 } else { raw };
        (secs > 0).then_some(secs)
    })
}

/// Live fields extracted from one provider event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveFields {
    pub status: Option<EventStatus>,
    pub score_home: Option<i32>,
    pub score_away: Option<i32>,
    pub display_score_home: Option<i32>,
    pub display_score_away: Option<i32>,
    pub kickoffs: PhaseKickoffs,
    pub minute: Option<i32>,
    pub last_event_ts: Option<i64>,
    pub provider_update_time: Option<i64>,
    pub incidents: Option<Value>,
    pub statistics: Option<Value>,
}

impl LiveFields {
    /// True when nothing usable was extracted.
    pub fn is_empty(&self) -> bool {
        *self == LiveFields::default()
    }

    /// Convert to field updates. The fact timestamp is the provider's update
    /// time when known, otherwise `fallback_ts`.
    pub fn into_updates(self, source: &str, priority: u32, fallback_ts: i64) -> Vec<FieldUpdate> {
        let ts = self.provider_update_time.unwrap_or(fallback_ts);
        let mut values = Vec::new();

        if let Some(status) = self.status {
            values.push(FieldValue::Status(status));
        }
        if self.score_home.is_some() {
            values.push(FieldValue::ScoreHome(self.score_home));
        }
        if self.score_away.is_some() {
            values.push(FieldValue::ScoreAway(self.score_away));
        }
        if self.display_score_home.is_some() {
            values.push(FieldValue::DisplayScoreHome(self.display_score_home));
        }
        if self.display_score_away.is_some() {
            values.push(FieldValue::DisplayScoreAway(self.display_score_away));
        }
        if let Some(ts) = self.kickoffs.phase1 {
            values.push(FieldValue::Phase1Kickoff(ts));
        }
        if let Some(ts) = self.kickoffs.phase2 {
            values.push(FieldValue::Phase2Kickoff(ts));
        }
        if let Some(ts) = self.kickoffs.extra {
            values.push(FieldValue::ExtraKickoff(ts));
        }
        if self.minute.is_some() {
            values.push(FieldValue::Minute(self.minute));
        }
        if let Some(ts) = self.last_event_ts {
            values.push(FieldValue::LastEventTs(ts));
        }
        if let Some(ts) = self.provider_update_time {
            values.push(FieldValue::ProviderUpdateTime(ts));
        }
        if let Some(v) = self.incidents {
            values.push(FieldValue::Incidents(v));
        }
        if let Some(v) = self.statistics {
            values.push(FieldValue::Statistics(v));
        }

        values
            .into_iter()
            .map(|value| FieldUpdate::new(value, source, priority, ts))
            .collect()
    }
}

/// Normalize one provider event node into live fields.
pub fn normalize_live(event: &Value, now: i64) -> LiveFields {
    let status = status_of(event);

    let score_home = score_at(
        event,
        &[
            &["homeScore", "current"],
            &["score", "home"],
            &["scores", "home"],
            &["goals", "home"],
            &["scoreHome"],
            &["score_home"],
        ],
    );
    let score_away = score_at(
        event,
        &[
            &["awayScore", "current"],
            &["score", "away"],
            &["scores", "away"],
            &["goals", "away"],
            &["scoreAway"],
            &["score_away"],
        ],
    );
    let display_score_home =
        score_at(event, &[&["homeScore", "display"], &["displayScoreHome"]]).or(score_home);
    let display_score_away =
        score_at(event, &[&["awayScore", "display"], &["displayScoreAway"]]).or(score_away);

    let mut kickoffs = PhaseKickoffs {
        phase1: timestamp_at(
            event,
            &[&["periods", "first"], &["kickoffs", "phase1"], &["phase1Kickoff"]],
        ),
        phase2: timestamp_at(
            event,
            &[&["periods", "second"], &["kickoffs", "phase2"], &["phase2Kickoff"]],
        ),
        extra: timestamp_at(
            event,
            &[&["periods", "extra"], &["kickoffs", "extra"], &["extraKickoff"]],
        ),
    };
    // Some feeds only report when the running period started.
    if let Some(start) = timestamp_at(event, &[&["time", "currentPeriodStartTimestamp"]]) {
        let slot = match status {
            Some(EventStatus::Phase1) => Some(&mut kickoffs.phase1),
            Some(EventStatus::Phase2) => Some(&mut kickoffs.phase2),
            Some(EventStatus::ExtraTime) => Some(&mut kickoffs.extra),
            _ => None,
        };
        if let Some(slot) = slot {
            slot.get_or_insert(start);
        }
    }

    let minute = score_at(
        event,
        &[&["minute"], &["elapsed"], &["status", "elapsed"], &["time", "minute"]],
    )
    .or_else(|| status.and_then(|s| derive_minute(s, &kickoffs, now)));

    let last_event_ts = timestamp_at(
        event,
        &[&["lastEventTs"], &["last_event_ts"], &["lastEventTimestamp"]],
    );
    let provider_update_time = timestamp_at(
        event,
        &[
            &["updatedAt"],
            &["update_time"],
            &["changes", "changeTimestamp"],
            &["changeTimestamp"],
        ],
    );

    let incidents = ["incidents", "timeline"]
        .iter()
        .find_map(|k| event.get(*k).filter(|v| v.is_array()).cloned());
    let statistics = ["statistics", "stats"]
        .iter()
        .find_map(|k| event.get(*k).filter(|v| !v.is_null()).cloned());

    LiveFields {
        status,
        score_home,
        score_away,
        display_score_home,
        display_score_away,
        kickoffs,
        minute,
        last_event_ts,
        provider_update_time,
        incidents,
        statistics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scoreline_core::Field;
    use serde_json::json;

    #[test]
    fn test_find_event_never_assumes_first_element() {
        let payload = json!([
            {"id": 111, "status": "FT"},
            {"id": 222, "status": "2H"},
        ]);
        let event = find_event(&payload, "222").unwrap();
        assert_eq!(event["status"], "2H");
        assert!(find_event(&payload, "333").is_none());
    }

    #[test]
    fn test_find_event_in_keyed_wrapper() {
        let payload = json!({
            "data": {
                "events": {
                    "sr:1": {"externalId": "sr:1", "status": "HT"},
                    "sr:2": {"externalId": "sr:2", "status": "1H"},
                }
            }
        });
        assert_eq!(find_event(&payload, "sr:2").unwrap()["status"], "1H");
    }

    #[test]
    fn test_find_event_prefers_shallowest_match() {
        // A team nested inside another event shares the requested id.
        let payload = json!({
            "events": [
                {"id": 9, "homeTeam": {"id": 42}},
                {"id": 42, "status": "1H"},
            ]
        });
        assert_eq!(find_event(&payload, "42").unwrap()["status"], "1H");
    }

    #[test]
    fn test_collect_ids_shapes() {
        assert_eq!(collect_ids(&json!(["a", 7, "a"])), vec!["a", "7"]);
        assert_eq!(
            collect_ids(&json!({"changes": [{"eventId": 5}, {"id": "x"}]})),
            vec!["5", "x"]
        );
        assert!(collect_ids(&json!({"unexpected": true})).is_empty());
    }

    #[test]
    fn test_map_status_codes() {
        assert_eq!(map_status("1H"), Some(EventStatus::Phase1));
        assert_eq!(map_status("half time"), Some(EventStatus::Intermission));
        assert_eq!(map_status("2nd-half"), Some(EventStatus::Phase2));
        assert_eq!(map_status("AET"), Some(EventStatus::Ended));
        assert_eq!(map_status("susp"), Some(EventStatus::Interrupted));
        assert_eq!(map_status("LIVE"), None);
    }

    #[test]
    fn test_normalize_nested_shape() {
        let event = json!({
            "id": 1,
            "status": {"short": "2H", "elapsed": 67},
            "homeScore": {"current": 2, "display": 2},
            "awayScore": {"current": 1},
            "periods": {"first": 1_700_000_000, "second": 1_700_003_600},
            "updatedAt": "2023-11-14T22:40:00Z",
            "incidents": [{"type": "goal"}],
        });
        let fields = normalize_live(&event, 1_700_005_000);
        assert_eq!(fields.status, Some(EventStatus::Phase2));
        assert_eq!(fields.score_home, Some(2));
        assert_eq!(fields.score_away, Some(1));
        assert_eq!(fields.display_score_away, Some(1));
        assert_eq!(fields.minute, Some(67));
        assert_eq!(fields.kickoffs.phase2, Some(1_700_003_600));
        assert_eq!(fields.provider_update_time, Some(1_700_001_600));
        assert!(fields.incidents.is_some());
    }

    #[test]
    fn test_normalize_derives_minute_from_period_start() {
        let event = json!({
            "id": 1,
            "status": "1H",
            "score": {"home": "0", "away": "0"},
            "time": {"currentPeriodStartTimestamp": 1_700_000_000_000_i64},
        });
        let fields = normalize_live(&event, 1_700_000_000 + 10 * 60);
        assert_eq!(fields.kickoffs.phase1, Some(1_700_000_000));
        assert_eq!(fields.minute, Some(11));
        assert_eq!(fields.score_home, Some(0));
    }

    #[test]
    fn test_unusable_event_is_empty() {
        let fields = normalize_live(&json!({"id": 1, "status": "???"}), 0);
        assert!(fields.is_empty());
    }

    #[test]
    fn test_into_updates_uses_provider_time() {
        let fields = LiveFields {
            status: Some(EventStatus::Phase1),
            score_home: Some(1),
            provider_update_time: Some(500),
            ..LiveFields::default()
        };
        let updates = fields.into_updates("reconcile", 30, 999);
        let names: Vec<Field> = updates.iter().map(|u| u.field()).collect();
        assert_eq!(
            names,
            vec![Field::Status, Field::ScoreHome, Field::ProviderUpdateTime]
        );
        assert!(updates.iter().all(|u| u.timestamp == 500 && u.priority == 30));
    }
}
