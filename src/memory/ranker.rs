//! Ranker: deterministic multi-factor scoring with a grounding gate and
//! confidence tiers.
//!
//! Score = entity·0.35 + intent·0.25 + temporal·0.20 + interaction·0.10
//! + source_quality·0.10, each sub-score in [0, 1]. Candidates with no
//! lexical or temporal tie to the prompt are clamped below the "maybe" band
//! so source quality alone can never surface them.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::debug;

use crate::config::RetrievalPolicy;
use crate::memory::types::{
    CalendarItem, Candidate, Confidence, EmailItem, NormalizedInput, RankedCandidates,
    ScoreBreakdown, ScoredCandidate, ToneHint, parse_item_timestamp,
};

pub const WEIGHT_ENTITY_MATCH: f64 = 0.35;
pub const WEIGHT_INTENT_MATCH: f64 = 0.25;
pub const WEIGHT_TEMPORAL_RELEVANCE: f64 = 0.20;
pub const WEIGHT_INTERACTION_SIGNAL: f64 = 0.10;
pub const WEIGHT_SOURCE_QUALITY: f64 = 0.10;

/// At or above: a strong match.
pub const HIGH_THRESHOLD: f64 = 0.72;
/// At or above (and below high): eligible for backfill.
pub const MAYBE_THRESHOLD: f64 = 0.55;

/// Ceiling for candidates that fail the grounding gate.
const UNGROUNDED_CEILING: f64 = MAYBE_THRESHOLD - 0.01;

/// Non-high confidence never presents more than this many items.
const NON_HIGH_MAX_SURFACED: usize = 2;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "give", "get", "hi", "how",
    "i", "if", "in", "is", "it", "me", "my", "of", "on", "or", "please", "show", "the", "there",
    "to", "we", "what", "when", "where", "which", "who", "with", "you", "your",
];

static TOKEN_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9@._-]+").expect("valid regex"));

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}").expect("valid regex"));

static INTENT_VOCABULARY: LazyLock<Vec<(ToneHint, Regex)>> = LazyLock::new(|| {
    [
        (ToneHint::Urgent, r"urgent|asap|priority|immediately"),
        (ToneHint::Delay, r"delay|blocked|stuck|late|pending"),
        (ToneHint::Decision, r"decision|approve|approved|sign-off|go/no-go"),
        (ToneHint::Reply, r"reply|respond|follow up|follow-up"),
    ]
    .into_iter()
    .map(|(hint, pattern)| (hint, Regex::new(pattern).expect("valid regex")))
    .collect()
});

/// Lowercase, split on non-token characters, drop stopwords.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    TOKEN_SPLIT
        .split(&lower)
        .map(str::trim)
        .filter(|t| !t.is_empty() && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Fraction of `a` found in `b`, relative to the shorter list.
pub fn overlap_ratio(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let b_set: HashSet<&str> = b.iter().map(String::as_str).collect();
    let hits = a.iter().filter(|t| b_set.contains(t.as_str())).count();
    hits as f64 / a.len().min(b.len()).max(1) as f64
}

fn entity_match(normalized: &NormalizedInput, item_terms: &[String]) -> f64 {
    let entity_terms = tokenize(&normalized.entities.join(" "));
    if entity_terms.is_empty() {
        return 0.2;
    }
    (overlap_ratio(&entity_terms, item_terms) * 1.2).min(1.0)
}

fn intent_match(normalized: &NormalizedInput, text_lower: &str) -> f64 {
    if normalized.tone_hints.is_empty() {
        return 0.15;
    }
    let hits = normalized
        .tone_hints
        .iter()
        .filter(|hint| {
            INTENT_VOCABULARY
                .iter()
                .any(|(h, re)| h == *hint && re.is_match(text_lower))
        })
        .count();
    if hits == 0 {
        0.1
    } else {
        (hits as f64 / normalized.tone_hints.len() as f64).min(1.0)
    }
}

fn temporal_relevance(normalized: &NormalizedInput, raw_date: &str, now: DateTime<Utc>) -> f64 {
    let Some(date) = parse_item_timestamp(raw_date) else {
        return 0.2;
    };
    let days_old = ((now - date).num_milliseconds() as f64 / 86_400_000.0).max(0.0);
    let recency = (1.0 - days_old / 365.0).max(0.0);

    let hints = normalized.date_hints.join(" ").to_lowercase();
    if !ISO_DATE.is_match(&hints) {
        return recency;
    }
    match raw_date.trim().get(..10) {
        Some(day) if hints.contains(day) => 1.0,
        _ => recency * 0.6,
    }
}

/// Completeness of the item's metadata. Summed in tenths so a fully
/// populated item scores exactly 1.0.
fn source_quality(candidate: &Candidate) -> f64 {
    let tenths: u32 = match candidate {
        Candidate::Email(item) => {
            4 + 2 * u32::from(item.subject.chars().count() >= 10)
                + 2 * u32::from(item.snippet.chars().count() >= 80)
                + 2 * u32::from(item.to.len() + item.cc.len() >= 2)
        }
        Candidate::Calendar(item) => {
            4 + 3 * u32::from(item.attendees.len() >= 2)
                + 2 * u32::from(item.description_preview.chars().count() >= 40)
                + u32::from(!item.organizer.trim().is_empty())
        }
    };
    (f64::from(tenths) / 10.0).min(1.0)
}

fn why_relevant(normalized: &NormalizedInput, text_lower: &str) -> String {
    let mut parts = Vec::new();
    if let Some(entity) = normalized
        .entities
        .iter()
        .find(|e| text_lower.contains(&e.to_lowercase()))
    {
        parts.push(format!("entity match: {entity}"));
    }
    if !normalized.date_hints.is_empty() {
        parts.push("time context match".to_string());
    }
    if !normalized.tone_hints.is_empty() {
        let hints: Vec<_> = normalized.tone_hints.iter().map(|h| h.as_str()).collect();
        parts.push(format!("intent signal: {}", hints.join(", ")));
    }
    if parts.is_empty() {
        parts.push("semantic relevance to prompt".to_string());
    }
    parts.join("; ")
}

fn score_candidate(
    normalized: &NormalizedInput,
    prompt_terms: &[String],
    candidate: Candidate,
    interaction_signal: f64,
    now: DateTime<Utc>,
) -> ScoredCandidate {
    let text = candidate.search_text();
    let text_lower = text.to_lowercase();
    let item_terms = tokenize(&text);

    let breakdown = ScoreBreakdown {
        entity_match: entity_match(normalized, &item_terms),
        intent_match: intent_match(normalized, &text_lower),
        temporal_relevance: temporal_relevance(normalized, candidate.date(), now),
        interaction_signal: interaction_signal.clamp(0.0, 1.0),
        source_quality: source_quality(&candidate),
    };

    let mut score = breakdown.entity_match * WEIGHT_ENTITY_MATCH
        + breakdown.intent_match * WEIGHT_INTENT_MATCH
        + breakdown.temporal_relevance * WEIGHT_TEMPORAL_RELEVANCE
        + breakdown.interaction_signal * WEIGHT_INTERACTION_SIGNAL
        + breakdown.source_quality * WEIGHT_SOURCE_QUALITY;

    let grounded = breakdown.entity_match >= 0.3
        || overlap_ratio(prompt_terms, &item_terms) >= 0.2
        || (!normalized.date_hints.is_empty() && breakdown.temporal_relevance >= 0.6);
    if !grounded {
        score = score.min(UNGROUNDED_CEILING);
    }

    ScoredCandidate {
        why_relevant: why_relevant(normalized, &text_lower),
        candidate,
        score,
        breakdown,
    }
}

/// Score, deduplicate, select the surfaced subset and label confidence.
///
/// `interaction_signal` maps an item id to its normalized engagement
/// strength; unknown ids should map to 0. Output depends only on the inputs.
pub fn rank_candidates<F>(
    normalized: &NormalizedInput,
    email_items: &[EmailItem],
    calendar_items: &[CalendarItem],
    interaction_signal: F,
    policy: &RetrievalPolicy,
    now: DateTime<Utc>,
) -> RankedCandidates
where
    F: Fn(&str) -> f64,
{
    let prompt_terms = tokenize(&normalized.cleaned_text);

    let mut scored: Vec<ScoredCandidate> = email_items
        .iter()
        .cloned()
        .map(Candidate::Email)
        .chain(calendar_items.iter().cloned().map(Candidate::Calendar))
        .map(|candidate| {
            let signal = interaction_signal(candidate.id());
            score_candidate(normalized, &prompt_terms, candidate, signal, now)
        })
        .collect();

    // Stable: ties keep input order.
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut seen = HashSet::new();
    scored.retain(|row| seen.insert(row.id().to_string()));

    let mut surfaced: Vec<ScoredCandidate> = scored
        .iter()
        .filter(|row| row.score >= HIGH_THRESHOLD)
        .take(policy.max_surfaced_items)
        .cloned()
        .collect();

    if surfaced.len() < policy.target_surfaced_items {
        let room = policy.max_surfaced_items.saturating_sub(surfaced.len());
        surfaced.extend(
            scored
                .iter()
                .filter(|row| row.score >= MAYBE_THRESHOLD && row.score < HIGH_THRESHOLD)
                .take(room)
                .cloned(),
        );
    }

    let top_score = scored.first().map_or(0.0, |row| row.score);
    let mean_surfaced = if surfaced.is_empty() {
        0.0
    } else {
        surfaced.iter().map(|row| row.score).sum::<f64>() / surfaced.len() as f64
    };
    let high_count = surfaced
        .iter()
        .filter(|row| row.score >= HIGH_THRESHOLD)
        .count();

    let confidence = if high_count >= 2
        && top_score >= HIGH_THRESHOLD
        && mean_surfaced >= MAYBE_THRESHOLD
    {
        Confidence::High
    } else if !surfaced.is_empty() {
        Confidence::Medium
    } else {
        Confidence::Low
    };

    if confidence != Confidence::High {
        surfaced.truncate(NON_HIGH_MAX_SURFACED);
    }

    debug!(
        scored = scored.len(),
        surfaced = surfaced.len(),
        top_score,
        confidence = confidence.as_str(),
        "Ranked candidates"
    );

    RankedCandidates {
        confidence,
        scored,
        surfaced,
    }
}
