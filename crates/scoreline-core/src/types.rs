//! Event record data model: statuses, fields, updates and write outcomes.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static EXTERNAL_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.:\-]{1,64}$").expect("valid external id regex"));

/// Whether `id` is a well-formed provider external id.
pub fn is_valid_external_id(id: &str) -> bool {
    EXTERNAL_ID_RE.is_match(id)
}

/// Source priorities. Higher wins during conflict resolution.
pub mod priority {
    /// Bulk backfills and historical imports.
    pub const BACKFILL: u32 = 10;
    /// Scheduled bucket pollers.
    pub const POLLER: u32 = 20;
    /// Targeted reconcile of a single record (queue drain and recovery).
    pub const RECONCILE: u32 = 30;
    /// Push-style change feed.
    pub const CHANGE_FEED: u32 = 40;
    /// Operator corrections made through a collaborator.
    pub const MANUAL: u32 = 90;
    /// Recovery ladder force-termination.
    pub const FORCED: u32 = u32::MAX;
}

// ---------------------------------------------------------------
// Status
// ---------------------------------------------------------------

/// Event lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    NotStarted,
    #[serde(rename = "PHASE_1")]
    Phase1,
    Intermission,
    #[serde(rename = "PHASE_2")]
    Phase2,
    ExtraTime,
    Shootout,
    Ended,
    Delayed,
    Interrupted,
}

impl EventStatus {
    pub const ALL: [EventStatus; 9] = [
        EventStatus::NotStarted,
        EventStatus::Phase1,
        EventStatus::Intermission,
        EventStatus::Phase2,
        EventStatus::ExtraTime,
        EventStatus::Shootout,
        EventStatus::Ended,
        EventStatus::Delayed,
        EventStatus::Interrupted,
    ];

    /// Live phases, including the interrupted side state.
    pub const LIVE: [EventStatus; 6] = [
        EventStatus::Phase1,
        EventStatus::Intermission,
        EventStatus::Phase2,
        EventStatus::ExtraTime,
        EventStatus::Shootout,
        EventStatus::Interrupted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::NotStarted => "NOT_STARTED",
            EventStatus::Phase1 => "PHASE_1",
            EventStatus::Intermission => "INTERMISSION",
            EventStatus::Phase2 => "PHASE_2",
            EventStatus::ExtraTime => "EXTRA_TIME",
            EventStatus::Shootout => "SHOOTOUT",
            EventStatus::Ended => "ENDED",
            EventStatus::Delayed => "DELAYED",
            EventStatus::Interrupted => "INTERRUPTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|st| st.as_str() == s)
    }

    pub fn is_terminal(self) -> bool {
        self == EventStatus::Ended
    }

    pub fn is_live(self) -> bool {
        Self::LIVE.contains(&self)
    }

    pub fn is_pre_match(self) -> bool {
        matches!(self, EventStatus::NotStarted | EventStatus::Delayed)
    }

    /// Position on the forward lifecycle. `Interrupted` is a side state
    /// reachable from and returning to any live phase, so it has no rank.
    pub fn lifecycle_rank(self) -> Option<u8> {
        match self {
            EventStatus::NotStarted | EventStatus::Delayed => Some(0),
            EventStatus::Phase1 => Some(1),
            EventStatus::Intermission => Some(2),
            EventStatus::Phase2 => Some(3),
            EventStatus::ExtraTime => Some(4),
            EventStatus::Shootout => Some(5),
            EventStatus::Ended => Some(6),
            EventStatus::Interrupted => None,
        }
    }

    /// A move strictly further along the lifecycle (any non-terminal → ENDED counts).
    pub fn is_forward_transition(from: EventStatus, to: EventStatus) -> bool {
        if from == to || from.is_terminal() {
            return false;
        }
        if to.is_terminal() {
            return true;
        }
        match (from.lifecycle_rank(), to.lifecycle_rank()) {
            (Some(a), Some(b)) => b > a,
            _ => false,
        }
    }

    /// A move backwards along the lifecycle.
    pub fn is_regression(from: EventStatus, to: EventStatus) -> bool {
        match (from.lifecycle_rank(), to.lifecycle_rank()) {
            (Some(a), Some(b)) => b < a,
            _ => false,
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------
// Fields
// ---------------------------------------------------------------

/// Live fields the orchestrator may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Status,
    ScoreHome,
    ScoreAway,
    DisplayScoreHome,
    DisplayScoreAway,
    Phase1Kickoff,
    Phase2Kickoff,
    ExtraKickoff,
    Minute,
    LastEventTs,
    ProviderUpdateTime,
    Incidents,
    Statistics,
}

impl Field {
    pub const ALL: [Field; 13] = [
        Field::Status,
        Field::ScoreHome,
        Field::ScoreAway,
        Field::DisplayScoreHome,
        Field::DisplayScoreAway,
        Field::Phase1Kickoff,
        Field::Phase2Kickoff,
        Field::ExtraKickoff,
        Field::Minute,
        Field::LastEventTs,
        Field::ProviderUpdateTime,
        Field::Incidents,
        Field::Statistics,
    ];

    /// Column name in the events table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Status => "status",
            Field::ScoreHome => "score_home",
            Field::ScoreAway => "score_away",
            Field::DisplayScoreHome => "display_score_home",
            Field::DisplayScoreAway => "display_score_away",
            Field::Phase1Kickoff => "phase1_kickoff",
            Field::Phase2Kickoff => "phase2_kickoff",
            Field::ExtraKickoff => "extra_kickoff",
            Field::Minute => "minute",
            Field::LastEventTs => "last_event_ts",
            Field::ProviderUpdateTime => "provider_update_time",
            Field::Incidents => "incidents",
            Field::Statistics => "statistics",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.as_str() == s)
    }

    /// Phase kickoff timestamps may be set once and never overwritten.
    pub fn is_write_once(self) -> bool {
        matches!(
            self,
            Field::Phase1Kickoff | Field::Phase2Kickoff | Field::ExtraKickoff
        )
    }

    /// Fields whose changes are pushed to the change-broadcast sink.
    pub fn is_broadcast(self) -> bool {
        matches!(
            self,
            Field::Status
                | Field::ScoreHome
                | Field::ScoreAway
                | Field::DisplayScoreHome
                | Field::DisplayScoreAway
                | Field::Minute
        )
    }
}

/// A typed value for one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Status(EventStatus),
    ScoreHome(Option<i32>),
    ScoreAway(Option<i32>),
    DisplayScoreHome(Option<i32>),
    DisplayScoreAway(Option<i32>),
    Phase1Kickoff(i64),
    Phase2Kickoff(i64),
    ExtraKickoff(i64),
    Minute(Option<i32>),
    LastEventTs(i64),
    ProviderUpdateTime(i64),
    Incidents(serde_json::Value),
    Statistics(serde_json::Value),
}

/// Upper bound for a plausible match minute, shootouts included.
pub const MAX_MINUTE: i32 = 300;

impl FieldValue {
    pub fn field(&self) -> Field {
        match self {
            FieldValue::Status(_) => Field::Status,
            FieldValue::ScoreHome(_) => Field::ScoreHome,
            FieldValue::ScoreAway(_) => Field::ScoreAway,
            FieldValue::DisplayScoreHome(_) => Field::DisplayScoreHome,
            FieldValue::DisplayScoreAway(_) => Field::DisplayScoreAway,
            FieldValue::Phase1Kickoff(_) => Field::Phase1Kickoff,
            FieldValue::Phase2Kickoff(_) => Field::Phase2Kickoff,
            FieldValue::ExtraKickoff(_) => Field::ExtraKickoff,
            FieldValue::Minute(_) => Field::Minute,
            FieldValue::LastEventTs(_) => Field::LastEventTs,
            FieldValue::ProviderUpdateTime(_) => Field::ProviderUpdateTime,
            FieldValue::Incidents(_) => Field::Incidents,
            FieldValue::Statistics(_) => Field::Statistics,
        }
    }

    /// Reject values no provider could legitimately report.
    pub fn validate(&self) -> std::result::Result<(), &'static str> {
        match self {
            FieldValue::ScoreHome(Some(v))
            | FieldValue::ScoreAway(Some(v))
            | FieldValue::DisplayScoreHome(Some(v))
            | FieldValue::DisplayScoreAway(Some(v))
                if *v < 0 =>
            {
                Err("negative score")
            }
            FieldValue::Minute(Some(m)) if !(0..=MAX_MINUTE).contains(m) => {
                Err("minute out of range")
            }
            FieldValue::Phase1Kickoff(ts)
            | FieldValue::Phase2Kickoff(ts)
            | FieldValue::ExtraKickoff(ts)
            | FieldValue::LastEventTs(ts)
            | FieldValue::ProviderUpdateTime(ts)
                if *ts <= 0 =>
            {
                Err("non-positive timestamp")
            }
            _ => Ok(()),
        }
    }
}

/// Per-field shadow metadata: the `(priority, timestamp)` of the last applied write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldVersion {
    pub priority: u32,
    pub timestamp: i64,
    pub source: String,
}

impl FieldVersion {
    /// Lexicographic `(priority, timestamp)` comparison: `self` wins ties.
    pub fn beats_or_ties(&self, other: &FieldVersion) -> bool {
        self.priority > other.priority
            || (self.priority == other.priority && self.timestamp >= other.timestamp)
    }
}

/// The atomic unit submitted to the write orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldUpdate {
    #[serde(flatten)]
    pub value: FieldValue,
    pub source: String,
    pub priority: u32,
    /// Epoch seconds of the fact, not of submission.
    pub timestamp: i64,
}

impl FieldUpdate {
    pub fn new(value: FieldValue, source: impl Into<String>, priority: u32, timestamp: i64) -> Self {
        Self {
            value,
            source: source.into(),
            priority,
            timestamp,
        }
    }

    pub fn field(&self) -> Field {
        self.value.field()
    }

    pub fn version(&self) -> FieldVersion {
        FieldVersion {
            priority: self.priority,
            timestamp: self.timestamp,
            source: self.source.clone(),
        }
    }
}

// ---------------------------------------------------------------
// Record
// ---------------------------------------------------------------

/// One epoch-seconds kickoff per phase. Each is write-once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseKickoffs {
    pub phase1: Option<i64>,
    pub phase2: Option<i64>,
    pub extra: Option<i64>,
}

/// One authoritative record per upstream event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub external_id: String,
    pub scheduled_time: Option<i64>,
    pub status: EventStatus,
    pub score_home: Option<i32>,
    pub score_away: Option<i32>,
    pub display_score_home: Option<i32>,
    pub display_score_away: Option<i32>,
    pub kickoffs: PhaseKickoffs,
    pub minute: Option<i32>,
    /// When `minute` last changed value.
    pub minute_updated_at: Option<i64>,
    pub last_event_ts: Option<i64>,
    pub provider_update_time: Option<i64>,
    pub incidents: Option<serde_json::Value>,
    pub statistics: Option<serde_json::Value>,
    pub updated_at: Option<i64>,
}

impl EventRecord {
    /// Furthest lifecycle rank this record is known to have reached, from
    /// its status and the kickoffs already recorded.
    pub fn reached_rank(&self) -> Option<u8> {
        let k = &self.kickoffs;
        let from_kickoffs = [(k.phase1, 1), (k.phase2, 3), (k.extra, 4)]
            .into_iter()
            .filter_map(|(ts, rank)| ts.map(|_| rank))
            .max();
        self.status.lifecycle_rank().max(from_kickoffs)
    }

    /// Whether moving this record to `to` goes backwards.
    ///
    /// `Interrupted` may be entered from any state. Leaving it never returns
    /// to a pre-match status nor to a phase below the furthest one reached.
    pub fn is_regression_to(&self, to: EventStatus) -> bool {
        if self.status == EventStatus::Interrupted && to.is_pre_match() {
            return true;
        }
        match (self.reached_rank(), to.lifecycle_rank()) {
            (Some(reached), Some(target)) => target < reached,
            _ => false,
        }
    }

    pub fn new(external_id: impl Into<String>, scheduled_time: Option<i64>) -> Self {
        Self {
            external_id: external_id.into(),
            scheduled_time,
            status: EventStatus::NotStarted,
            score_home: None,
            score_away: None,
            display_score_home: None,
            display_score_away: None,
            kickoffs: PhaseKickoffs::default(),
            minute: None,
            minute_updated_at: None,
            last_event_ts: None,
            provider_update_time: None,
            incidents: None,
            statistics: None,
            updated_at: None,
        }
    }

    /// Whether a write-once field already holds a value.
    pub fn is_set(&self, field: Field) -> bool {
        match field {
            Field::Phase1Kickoff => self.kickoffs.phase1.is_some(),
            Field::Phase2Kickoff => self.kickoffs.phase2.is_some(),
            Field::ExtraKickoff => self.kickoffs.extra.is_some(),
            _ => false,
        }
    }

    /// Whether applying `value` would leave the record unchanged.
    pub fn holds(&self, value: &FieldValue) -> bool {
        match value {
            FieldValue::Status(v) => self.status == *v,
            FieldValue::ScoreHome(v) => self.score_home == *v,
            FieldValue::ScoreAway(v) => self.score_away == *v,
            FieldValue::DisplayScoreHome(v) => self.display_score_home == *v,
            FieldValue::DisplayScoreAway(v) => self.display_score_away == *v,
            FieldValue::Phase1Kickoff(v) => self.kickoffs.phase1 == Some(*v),
            FieldValue::Phase2Kickoff(v) => self.kickoffs.phase2 == Some(*v),
            FieldValue::ExtraKickoff(v) => self.kickoffs.extra == Some(*v),
            FieldValue::Minute(v) => self.minute == *v,
            FieldValue::LastEventTs(v) => self.last_event_ts == Some(*v),
            FieldValue::ProviderUpdateTime(v) => self.provider_update_time == Some(*v),
            FieldValue::Incidents(v) => self.incidents.as_ref() == Some(v),
            FieldValue::Statistics(v) => self.statistics.as_ref() == Some(v),
        }
    }

    /// Apply a value in memory. Persistence is the store's job.
    pub fn apply(&mut self, value: &FieldValue) {
        match value {
            FieldValue::Status(v) => self.status = *v,
            FieldValue::ScoreHome(v) => self.score_home = *v,
            FieldValue::ScoreAway(v) => self.score_away = *v,
            FieldValue::DisplayScoreHome(v) => self.display_score_home = *v,
            FieldValue::DisplayScoreAway(v) => self.display_score_away = *v,
            FieldValue::Phase1Kickoff(v) => self.kickoffs.phase1 = Some(*v),
            FieldValue::Phase2Kickoff(v) => self.kickoffs.phase2 = Some(*v),
            FieldValue::ExtraKickoff(v) => self.kickoffs.extra = Some(*v),
            FieldValue::Minute(v) => self.minute = *v,
            FieldValue::LastEventTs(v) => self.last_event_ts = Some(*v),
            FieldValue::ProviderUpdateTime(v) => self.provider_update_time = Some(*v),
            FieldValue::Incidents(v) => self.incidents = Some(v.clone()),
            FieldValue::Statistics(v) => self.statistics = Some(v.clone()),
        }
    }

    /// Most recent freshness marker, if any.
    pub fn freshness(&self) -> Option<i64> {
        match (self.last_event_ts, self.provider_update_time) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

// ---------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    RejectedImmutable,
    RejectedLocked,
    RejectedStale,
    RejectedInvalid,
    Error,
}

/// Why a single field in a batch was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Lost the `(priority, timestamp)` comparison.
    Stale,
    /// Write-once field already set.
    WriteOnce,
    /// Status would move backwards along the lifecycle.
    Regression,
    Invalid,
    /// Won the comparison but the value was already current.
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedField {
    pub field: Field,
    pub reason: SkipReason,
}

/// Result of one `update_record` call. Always a value, never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOutcome {
    pub status: OutcomeStatus,
    pub fields_updated: Vec<Field>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub skipped: Vec<SkippedField>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl UpdateOutcome {
    pub fn success(fields_updated: Vec<Field>, skipped: Vec<SkippedField>) -> Self {
        Self {
            status: OutcomeStatus::Success,
            fields_updated,
            skipped,
            error: None,
        }
    }

    pub fn rejected(status: OutcomeStatus) -> Self {
        Self {
            status,
            fields_updated: Vec::new(),
            skipped: Vec::new(),
            error: None,
        }
    }

    pub fn stale(skipped: Vec<SkippedField>) -> Self {
        Self {
            skipped,
            ..Self::rejected(OutcomeStatus::RejectedStale)
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::rejected(OutcomeStatus::Error)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    /// Whether at least one field value changed.
    pub fn changed(&self) -> bool {
        !self.fields_updated.is_empty()
    }

    /// Lock contention and persistence failures are worth another cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.status,
            OutcomeStatus::RejectedLocked | OutcomeStatus::Error
        )
    }
}

// ---------------------------------------------------------------
// Staleness
// ---------------------------------------------------------------

/// Which detection bucket flagged a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleReason {
    /// Generic live phase with no freshness movement.
    Stale,
    IntermissionStuck,
    SecondPhaseNoProgress,
    InterruptedStuck,
    /// Scheduled start has passed but status is still pre-match.
    ShouldBeActive,
}

impl StaleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StaleReason::Stale => "stale",
            StaleReason::IntermissionStuck => "intermission_stuck",
            StaleReason::SecondPhaseNoProgress => "second_phase_no_progress",
            StaleReason::InterruptedStuck => "interrupted_stuck",
            StaleReason::ShouldBeActive => "should_be_active",
        }
    }
}

/// A record the staleness detector believes has stopped advancing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaleCandidate {
    pub id: String,
    pub status: EventStatus,
    pub minute: Option<i32>,
    pub last_event_ts: Option<i64>,
    pub provider_update_time: Option<i64>,
    pub reason: StaleReason,
    pub age_seconds: i64,
    pub threshold_seconds: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_id_validation() {
        assert!(is_valid_external_id("sr:match:41762835"));
        assert!(is_valid_external_id("12345"));
        assert!(!is_valid_external_id(""));
        assert!(!is_valid_external_id("drop table; --"));
        assert!(!is_valid_external_id(&"x".repeat(65)));
    }

    #[test]
    fn test_status_round_trip_names() {
        for status in EventStatus::ALL {
            assert_eq!(EventStatus::parse(status.as_str()), Some(status));
        }
        let json = serde_json::to_string(&EventStatus::Phase2).unwrap();
        assert_eq!(json, "\"PHASE_2\"");
    }

    #[test]
    fn test_forward_transitions() {
        use EventStatus::*;
        assert!(EventStatus::is_forward_transition(NotStarted, Phase1));
        assert!(EventStatus::is_forward_transition(Phase2, Ended));
        assert!(EventStatus::is_forward_transition(Interrupted, Ended));
        assert!(!EventStatus::is_forward_transition(Phase2, Phase1));
        assert!(!EventStatus::is_forward_transition(Ended, Ended));
        assert!(!EventStatus::is_forward_transition(Phase1, Interrupted));
    }

    #[test]
    fn test_regressions() {
        use EventStatus::*;
        assert!(EventStatus::is_regression(Phase2, Intermission));
        assert!(EventStatus::is_regression(Phase1, Delayed));
        assert!(!EventStatus::is_regression(Interrupted, Phase1));
        assert!(!EventStatus::is_regression(Phase1, Interrupted));
        assert!(!EventStatus::is_regression(NotStarted, Delayed));
    }

    #[test]
    fn test_leaving_interrupted_never_goes_back() {
        use EventStatus::*;
        let mut r = EventRecord::new("m1", Some(1_000));
        r.status = Interrupted;
        assert!(r.is_regression_to(NotStarted));
        assert!(r.is_regression_to(Delayed));
        assert!(!r.is_regression_to(Phase1));

        r.kickoffs.phase2 = Some(4_000);
        assert_eq!(r.reached_rank(), Some(3));
        assert!(r.is_regression_to(Phase1));
        assert!(r.is_regression_to(Intermission));
        assert!(!r.is_regression_to(Phase2));
        assert!(!r.is_regression_to(ExtraTime));
        assert!(!r.is_regression_to(Ended));
    }

    #[test]
    fn test_kickoffs_raise_the_floor() {
        let mut r = EventRecord::new("m1", Some(1_000));
        r.status = EventStatus::Phase1;
        assert_eq!(r.reached_rank(), Some(1));
        r.kickoffs.extra = Some(9_000);
        assert_eq!(r.reached_rank(), Some(4));
        assert!(r.is_regression_to(EventStatus::Phase2));
        assert!(!r.is_regression_to(EventStatus::Interrupted));
    }

    #[test]
    fn test_version_ordering_is_priority_first() {
        let stored = FieldVersion {
            priority: 20,
            timestamp: 1_000,
            source: "poller".into(),
        };
        let higher_but_older = FieldVersion {
            priority: 30,
            timestamp: 500,
            source: "reconcile".into(),
        };
        let same_and_equal = FieldVersion {
            priority: 20,
            timestamp: 1_000,
            source: "feed".into(),
        };
        assert!(higher_but_older.beats_or_ties(&stored));
        assert!(!stored.beats_or_ties(&higher_but_older));
        assert!(same_and_equal.beats_or_ties(&stored));
    }

    #[test]
    fn test_value_validation() {
        assert!(FieldValue::ScoreHome(Some(-1)).validate().is_err());
        assert!(FieldValue::ScoreHome(None).validate().is_ok());
        assert!(FieldValue::Minute(Some(301)).validate().is_err());
        assert!(FieldValue::Phase1Kickoff(0).validate().is_err());
        assert!(FieldValue::Status(EventStatus::Ended).validate().is_ok());
    }

    #[test]
    fn test_field_update_serializes_flat() {
        let update = FieldUpdate::new(FieldValue::ScoreHome(Some(2)), "feed", 40, 1_700_000_000);
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["field"], "score_home");
        assert_eq!(json["value"], 2);
        assert_eq!(json["priority"], 40);
    }

    #[test]
    fn test_freshness_takes_latest_marker() {
        let mut record = EventRecord::new("1", None);
        assert_eq!(record.freshness(), None);
        record.last_event_ts = Some(100);
        assert_eq!(record.freshness(), Some(100));
        record.provider_update_time = Some(150);
        assert_eq!(record.freshness(), Some(150));
    }
}
