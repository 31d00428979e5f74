//! Shared types for the memory retrieval pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Sources ─────────────────────────────────────────────────────────

/// Which backend a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Email,
    Calendar,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Calendar => "calendar",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Backend contracts ───────────────────────────────────────────────

/// An email returned by the email search backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailItem {
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    /// ISO 8601.
    pub timestamp: String,
    pub snippet: String,
    /// Provider deep link.
    pub url: String,
}

/// A calendar event returned by the calendar search backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarItem {
    pub id: String,
    pub title: String,
    /// ISO 8601 date-time, or a bare date for all-day events.
    pub start_time: String,
    pub end_time: String,
    pub organizer: String,
    pub attendees: Vec<String>,
    pub description_preview: String,
    /// Provider deep link.
    pub url: String,
}

/// Filters for an email search call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailFilters {
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,
    /// OR-matched against sender and recipients.
    pub participants: Vec<String>,
    pub thread_only: bool,
    pub max_results: u32,
}

/// Filters for a calendar search call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarFilters {
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,
    /// Case-insensitive substrings of organizer + attendee text.
    pub attendees: Vec<String>,
    pub max_results: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailSearchResponse {
    #[serde(default)]
    pub items: Vec<EmailItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalendarSearchResponse {
    #[serde(default)]
    pub items: Vec<CalendarItem>,
}

/// Parse a backend timestamp: RFC 3339, naive `YYYY-MM-DDTHH:MM:SS` (read as
/// UTC), or a bare all-day date.
pub fn parse_item_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(chrono::NaiveTime::MIN).and_utc())
}

// ── Candidates ──────────────────────────────────────────────────────

/// A retrieved item, not yet scored. Two candidates are the same iff
/// their ids are equal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Candidate {
    Email(EmailItem),
    Calendar(CalendarItem),
}

/// Maximum participants carried into a result item.
const MAX_PARTICIPANTS: usize = 8;

impl Candidate {
    pub fn id(&self) -> &str {
        match self {
            Self::Email(item) => &item.id,
            Self::Calendar(item) => &item.id,
        }
    }

    pub fn source_type(&self) -> SourceType {
        match self {
            Self::Email(_) => SourceType::Email,
            Self::Calendar(_) => SourceType::Calendar,
        }
    }

    /// Timestamp for emails, start time for events.
    pub fn date(&self) -> &str {
        match self {
            Self::Email(item) => &item.timestamp,
            Self::Calendar(item) => &item.start_time,
        }
    }

    pub fn title(&self) -> String {
        match self {
            Self::Email(item) if item.subject.trim().is_empty() => "(No subject)".to_string(),
            Self::Email(item) => item.subject.clone(),
            Self::Calendar(item) if item.title.trim().is_empty() => "(No title)".to_string(),
            Self::Calendar(item) => item.title.clone(),
        }
    }

    pub fn snippet(&self) -> &str {
        match self {
            Self::Email(item) => &item.snippet,
            Self::Calendar(item) => &item.description_preview,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Self::Email(item) => &item.url,
            Self::Calendar(item) => &item.url,
        }
    }

    /// Sender or organizer first, then recipients or attendees.
    pub fn participants(&self) -> Vec<String> {
        let (lead, rest): (&str, Vec<&String>) = match self {
            Self::Email(item) => (
                item.from.as_str(),
                item.to.iter().chain(item.cc.iter()).collect(),
            ),
            Self::Calendar(item) => (item.organizer.as_str(), item.attendees.iter().collect()),
        };
        std::iter::once(lead)
            .chain(rest.into_iter().map(String::as_str))
            .filter(|p| !p.trim().is_empty())
            .take(MAX_PARTICIPANTS)
            .map(str::to_string)
            .collect()
    }

    /// All free text used for lexical scoring.
    pub fn search_text(&self) -> String {
        let parts: Vec<&str> = match self {
            Self::Email(item) => std::iter::once(item.subject.as_str())
                .chain(std::iter::once(item.from.as_str()))
                .chain(item.to.iter().map(String::as_str))
                .chain(item.cc.iter().map(String::as_str))
                .chain(std::iter::once(item.snippet.as_str()))
                .collect(),
            Self::Calendar(item) => std::iter::once(item.title.as_str())
                .chain(std::iter::once(item.organizer.as_str()))
                .chain(item.attendees.iter().map(String::as_str))
                .chain(std::iter::once(item.description_preview.as_str()))
                .collect(),
        };
        parts.join(" ")
    }
}

// ── Normalized input ────────────────────────────────────────────────

/// Coarse tone/intent category detected in text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneHint {
    Urgent,
    Delay,
    Decision,
    Reply,
}

impl ToneHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::Delay => "delay",
            Self::Decision => "decision",
            Self::Reply => "reply",
        }
    }
}

/// What kind of answer the user is after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    RecentActivity,
    CountByTime,
    DecisionHistory,
    ReplySupport,
    #[default]
    GeneralContext,
}

impl QueryIntent {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "recent_activity" => Some(Self::RecentActivity),
            "count_by_time" => Some(Self::CountByTime),
            "decision_history" => Some(Self::DecisionHistory),
            "reply_support" => Some(Self::ReplySupport),
            "general_context" => Some(Self::GeneralContext),
            _ => None,
        }
    }

    /// Recency and count questions widen the email search scope.
    pub fn is_recent_or_count(&self) -> bool {
        matches!(self, Self::RecentActivity | Self::CountByTime)
    }
}

/// Structured signals derived from raw user text. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizedInput {
    pub cleaned_text: String,
    pub entities: Vec<String>,
    pub date_hints: Vec<String>,
    pub tone_hints: Vec<ToneHint>,
    pub retrieval_intent: QueryIntent,
    pub requested_count: Option<u32>,
}

// ── Query understanding ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePreference {
    Email,
    Calendar,
    #[default]
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateConstraintType {
    #[default]
    None,
    Yesterday,
    Today,
    #[serde(rename = "last_7_days")]
    Last7Days,
    #[serde(rename = "last_30_days")]
    Last30Days,
    IsoRange,
}

impl DateConstraintType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "none" => Some(Self::None),
            "yesterday" => Some(Self::Yesterday),
            "today" => Some(Self::Today),
            "last_7_days" => Some(Self::Last7Days),
            "last_30_days" => Some(Self::Last30Days),
            "iso_range" => Some(Self::IsoRange),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DateConstraint {
    #[serde(rename = "type")]
    pub kind: DateConstraintType,
    /// Only meaningful for `IsoRange`; resolved by the planner.
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryVariants {
    pub email: Vec<String>,
    pub calendar: Vec<String>,
}

impl QueryVariants {
    pub fn for_tool(&self, tool: SourceType) -> &[String] {
        match tool {
            SourceType::Email => &self.email,
            SourceType::Calendar => &self.calendar,
        }
    }
}

/// Structured intent. Always fully populated; see
/// `QueryUnderstanding::from_untyped` for how LLM output is coerced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryUnderstanding {
    pub intent: QueryIntent,
    pub source_preference: SourcePreference,
    /// 1..=5 when present.
    pub requested_count: Option<u32>,
    pub entities: Vec<String>,
    pub date_constraint: DateConstraint,
    pub query_variants_by_tool: QueryVariants,
}

// ── Query plan ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CallFilters {
    Email(EmailFilters),
    Calendar(CalendarFilters),
}

/// One concrete backend call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedCall {
    pub tool: SourceType,
    pub query: String,
    pub filters: CallFilters,
}

impl PlannedCall {
    pub fn email(query: impl Into<String>, filters: EmailFilters) -> Self {
        Self {
            tool: SourceType::Email,
            query: query.into(),
            filters: CallFilters::Email(filters),
        }
    }

    pub fn calendar(query: impl Into<String>, filters: CalendarFilters) -> Self {
        Self {
            tool: SourceType::Calendar,
            query: query.into(),
            filters: CallFilters::Calendar(filters),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryPlan {
    pub tools: Vec<SourceType>,
    pub calls: Vec<PlannedCall>,
}

// ── Ranking ─────────────────────────────────────────────────────────

/// The five weighted sub-scores, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub entity_match: f64,
    pub intent_match: f64,
    pub temporal_relevance: f64,
    pub interaction_signal: f64,
    pub source_quality: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    pub why_relevant: String,
}

impl ScoredCandidate {
    pub fn id(&self) -> &str {
        self.candidate.id()
    }

    pub fn source_type(&self) -> SourceType {
        self.candidate.source_type()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// Output of the ranker.
#[derive(Debug, Clone)]
pub struct RankedCandidates {
    pub confidence: Confidence,
    /// Deduplicated, sorted by score descending.
    pub scored: Vec<ScoredCandidate>,
    /// Bounded subset handed to the synthesizer.
    pub surfaced: Vec<ScoredCandidate>,
}

/// Items returned per source across all calls of one query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievedCount {
    pub email: usize,
    pub calendar: usize,
}

// ── Response envelope ───────────────────────────────────────────────

/// One cited item in the outbound response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
    pub title: String,
    pub source_type: SourceType,
    pub source_id: String,
    pub why_relevant: String,
    pub date: String,
    pub participants: Vec<String>,
    pub snippet: String,
    pub url: String,
    pub score: f64,
}

/// The outbound contract object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub summary: String,
    pub confidence: Confidence,
    pub items: Vec<ResultItem>,
    pub fallback_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> EmailItem {
        EmailItem {
            id: "m1".into(),
            thread_id: "t1".into(),
            subject: "Q3 budget".into(),
            from: "Dana <dana@acme.com>".into(),
            to: vec!["me@acme.com".into()],
            cc: vec!["cfo@acme.com".into()],
            timestamp: "2026-10-01T09:00:00Z".into(),
            snippet: "numbers attached".into(),
            url: "https://mail.example.com/m1".into(),
        }
    }

    #[test]
    fn candidate_accessors_email() {
        let c = Candidate::Email(email());
        assert_eq!(c.id(), "m1");
        assert_eq!(c.source_type(), SourceType::Email);
        assert_eq!(c.date(), "2026-10-01T09:00:00Z");
        assert_eq!(
            c.participants(),
            vec!["Dana <dana@acme.com>", "me@acme.com", "cfo@acme.com"]
        );
        assert!(c.search_text().contains("numbers attached"));
    }

    #[test]
    fn empty_titles_get_placeholders() {
        let mut e = email();
        e.subject = "  ".into();
        assert_eq!(Candidate::Email(e).title(), "(No subject)");
        assert_eq!(
            Candidate::Calendar(CalendarItem::default()).title(),
            "(No title)"
        );
    }

    #[test]
    fn participants_are_capped_and_skip_blank_organizer() {
        let event = CalendarItem {
            id: "e1".into(),
            attendees: (0..12).map(|i| format!("p{i}@x.com")).collect(),
            ..Default::default()
        };
        let participants = Candidate::Calendar(event).participants();
        assert_eq!(participants.len(), 8);
        assert_eq!(participants[0], "p0@x.com");
    }

    #[test]
    fn parses_backend_timestamps() {
        assert!(parse_item_timestamp("2026-10-01T09:00:00Z").is_some());
        assert!(parse_item_timestamp("2026-10-01T09:00:00-07:00").is_some());
        assert!(parse_item_timestamp("2026-10-01T09:00:00").is_some());
        assert_eq!(
            parse_item_timestamp("2026-10-01").map(|d| d.to_rfc3339()),
            Some("2026-10-01T00:00:00+00:00".to_string())
        );
        assert!(parse_item_timestamp("").is_none());
        assert!(parse_item_timestamp("last tuesday").is_none());
    }

    #[test]
    fn email_item_deserializes_with_missing_fields() {
        let item: EmailItem = serde_json::from_str(r#"{"id": "x", "subject": "hi"}"#).unwrap();
        assert_eq!(item.id, "x");
        assert!(item.to.is_empty());
    }

    #[test]
    fn date_constraint_serializes_type_key() {
        let dc = DateConstraint {
            kind: DateConstraintType::Last7Days,
            date_from: None,
            date_to: None,
        };
        let json = serde_json::to_value(&dc).unwrap();
        assert_eq!(json["type"], "last_7_days");
    }

    #[test]
    fn envelope_serializes_lowercase_confidence() {
        let env = ResponseEnvelope {
            summary: String::new(),
            confidence: Confidence::Low,
            items: vec![],
            fallback_message: Some("nothing".into()),
        };
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["confidence"], "low");
        assert_eq!(json["fallback_message"], "nothing");
    }
}
