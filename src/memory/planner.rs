//! Query planner: turns normalized input + understanding into a bounded
//! set of concrete backend calls.
//!
//! The call budget (`max_calls_per_request`, `max_variants_per_tool`) bounds
//! external cost per user query. Truncation is deterministic: tools in plan
//! order, then variants in order.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, Months, NaiveDate, NaiveTime, Utc};
use regex::Regex;

use crate::config::RetrievalPolicy;
use crate::memory::normalizer::distinct;
use crate::memory::types::{
    CalendarFilters, DateConstraintType, EmailFilters, NormalizedInput, PlannedCall, QueryPlan,
    QueryUnderstanding, SourcePreference, SourceType,
};

/// Entities used as participant/attendee filters.
const MAX_FILTER_ENTITIES: usize = 5;

/// Floor on email results for recency/count questions.
const RECENT_MIN_RESULTS: u32 = 8;
const RECENT_DEFAULT_COUNT: u32 = 3;

static EMAIL_TOOL_SIGNAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"email|inbox|thread|message|subject|reply|sent").expect("valid regex")
});

static CALENDAR_TOOL_SIGNAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"calendar|meeting|event|schedule|invite|attendee").expect("valid regex")
});

/// An absolute UTC window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Build the plan for one query.
pub fn build_query_plan(
    normalized: &NormalizedInput,
    understanding: &QueryUnderstanding,
    policy: &RetrievalPolicy,
    now: DateTime<Utc>,
) -> QueryPlan {
    let tools = resolve_tools(normalized, understanding);
    let range = resolve_date_range(understanding, policy, now);
    let fallback_variants = derive_variants(normalized, policy);

    let mut merged_entities = distinct(
        understanding
            .entities
            .iter()
            .chain(normalized.entities.iter()),
    );
    merged_entities.truncate(MAX_FILTER_ENTITIES);

    let recent_or_count = understanding.intent.is_recent_or_count();
    let email_max_results = if recent_or_count {
        RECENT_MIN_RESULTS.max(understanding.requested_count.unwrap_or(RECENT_DEFAULT_COUNT))
    } else {
        policy.max_results_per_call
    }
    .min(policy.max_results_per_call);

    let mut calls = Vec::new();
    'tools: for &tool in &tools {
        let from_understanding = understanding.query_variants_by_tool.for_tool(tool);
        let mut variants = if from_understanding.is_empty() {
            fallback_variants.clone()
        } else {
            distinct(from_understanding)
        };
        variants.truncate(policy.max_variants_per_tool);
        if variants.is_empty() {
            variants.push(String::new());
        }

        for query in variants {
            if calls.len() >= policy.max_calls_per_request {
                break 'tools;
            }
            let call = match tool {
                SourceType::Email => PlannedCall::email(
                    query,
                    EmailFilters {
                        date_from: range.from,
                        date_to: range.to,
                        participants: merged_entities.clone(),
                        thread_only: !recent_or_count,
                        max_results: email_max_results,
                    },
                ),
                SourceType::Calendar => PlannedCall::calendar(
                    query,
                    CalendarFilters {
                        date_from: range.from,
                        date_to: range.to,
                        attendees: merged_entities.clone(),
                        max_results: policy.max_results_per_call,
                    },
                ),
            };
            calls.push(call);
        }
    }

    QueryPlan { tools, calls }
}

/// Explicit preference wins; otherwise keyword inference, defaulting to both.
fn resolve_tools(normalized: &NormalizedInput, understanding: &QueryUnderstanding) -> Vec<SourceType> {
    match understanding.source_preference {
        SourcePreference::Email => vec![SourceType::Email],
        SourcePreference::Calendar => vec![SourceType::Calendar],
        SourcePreference::Both => {
            let lower = normalized.cleaned_text.to_lowercase();
            match (
                EMAIL_TOOL_SIGNAL.is_match(&lower),
                CALENDAR_TOOL_SIGNAL.is_match(&lower),
            ) {
                (true, false) => vec![SourceType::Email],
                (false, true) => vec![SourceType::Calendar],
                _ => vec![SourceType::Email, SourceType::Calendar],
            }
        }
    }
}

/// Query variants derived from the normalizer alone.
fn derive_variants(normalized: &NormalizedInput, policy: &RetrievalPolicy) -> Vec<String> {
    let mut variants = vec![normalized.cleaned_text.clone()];
    if !normalized.entities.is_empty() {
        variants.push(
            normalized
                .entities
                .iter()
                .take(MAX_FILTER_ENTITIES)
                .cloned()
                .collect::<Vec<_>>()
                .join(" "),
        );
    }
    if variants.len() < policy.max_variants_per_tool && !normalized.tone_hints.is_empty() {
        variants.push(
            normalized
                .tone_hints
                .iter()
                .map(|h| h.as_str())
                .collect::<Vec<_>>()
                .join(" "),
        );
    }
    let mut variants = distinct(variants);
    variants.truncate(policy.max_variants_per_tool);
    variants
}

/// Resolve the understanding's date constraint to an absolute window.
pub fn resolve_date_range(
    understanding: &QueryUnderstanding,
    policy: &RetrievalPolicy,
    now: DateTime<Utc>,
) -> DateRange {
    let constraint = &understanding.date_constraint;
    match constraint.kind {
        DateConstraintType::Today => whole_day(now.date_naive()),
        DateConstraintType::Yesterday => whole_day((now - Duration::days(1)).date_naive()),
        DateConstraintType::Last7Days => DateRange {
            from: now - Duration::days(7),
            to: now,
        },
        DateConstraintType::Last30Days => DateRange {
            from: now - Duration::days(30),
            to: now,
        },
        DateConstraintType::IsoRange => {
            let from = constraint
                .date_from
                .as_deref()
                .and_then(|s| parse_boundary(s, false));
            let to = constraint
                .date_to
                .as_deref()
                .and_then(|s| parse_boundary(s, true));
            match (from, to) {
                (Some(from), Some(to)) if from <= to => DateRange { from, to },
                _ => default_window(policy, now),
            }
        }
        DateConstraintType::None => default_window(policy, now),
    }
}

fn default_window(policy: &RetrievalPolicy, now: DateTime<Utc>) -> DateRange {
    let from = now
        .checked_sub_months(Months::new(policy.time_window_months))
        .unwrap_or(now - Duration::days(365));
    DateRange { from, to: now }
}

fn whole_day(date: NaiveDate) -> DateRange {
    DateRange {
        from: date.and_time(NaiveTime::MIN).and_utc(),
        to: end_of_day(date),
    }
}

fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_milli_opt(23, 59, 59, 999)
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|| date.and_time(NaiveTime::MIN).and_utc())
}

/// RFC 3339 timestamp, or `YYYY-MM-DD` (start or end of that UTC day).
fn parse_boundary(raw: &str, end: bool) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    Some(if end {
        end_of_day(date)
    } else {
        date.and_time(NaiveTime::MIN).and_utc()
    })
}
