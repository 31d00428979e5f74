//! Input normalizer: raw text to structured signals.
//!
//! Pure string parsing: no I/O, no LLM calls, never fails.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::memory::types::{NormalizedInput, QueryIntent, ToneHint};

/// Maximum entities kept per query.
pub const MAX_ENTITIES: usize = 12;

const RELATIVE_DATE_HINTS: &[&str] = &[
    "today",
    "tomorrow",
    "yesterday",
    "this week",
    "last week",
    "this month",
    "last month",
];

static CAPITALIZED_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*\b").expect("valid regex"));

static ACRONYM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][A-Z0-9]+\b").expect("valid regex"));

static EMAIL_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}\b").expect("valid regex")
});

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").expect("valid regex"));

static TONE_PATTERNS: LazyLock<Vec<(ToneHint, Regex)>> = LazyLock::new(|| {
    [
        (ToneHint::Urgent, r"urgent|asap|immediately|quick"),
        (ToneHint::Delay, r"delay|blocked|stuck|waiting|late"),
        (ToneHint::Decision, r"decision|decide|approval|approved|sign[- ]off"),
        (ToneHint::Reply, r"reply|respond|response|follow[- ]up"),
    ]
    .into_iter()
    .map(|(hint, pattern)| (hint, Regex::new(pattern).expect("valid regex")))
    .collect()
});

static COUNT_INTENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"how many|count|number of").expect("valid regex"));
static RECENT_INTENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(last|latest|recent)").expect("valid regex"));
static DECISION_INTENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"decision|approved|approval|sign[- ]off").expect("valid regex"));
static REPLY_INTENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"reply|respond|follow[- ]up").expect("valid regex"));

static COUNT_BEFORE_NOUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(\d{1,2}|one|two|three|four|five|six|seven|eight|nine|ten)\s+(?:\w+\s+)?(?:emails?|messages?|meetings?|events?|threads?|items?|results?)\b",
    )
    .expect("valid regex")
});
static COUNT_AFTER_QUALIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:top|last|latest|first)\s+(\d{1,2}|one|two|three|four|five|six|seven|eight|nine|ten)\b")
        .expect("valid regex")
});

/// Normalize raw user text into structured signals.
pub fn normalize_input(raw: &str) -> NormalizedInput {
    let cleaned_text = compact_whitespace(raw);
    let lower = cleaned_text.to_lowercase();

    NormalizedInput {
        entities: extract_entities(&cleaned_text),
        date_hints: extract_date_hints(&cleaned_text, &lower),
        tone_hints: extract_tone_hints(&lower),
        retrieval_intent: classify_intent(&lower),
        requested_count: extract_requested_count(&lower),
        cleaned_text,
    }
}

fn compact_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Deduplicate preserving first occurrence, dropping blanks.
pub(crate) fn distinct<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    values
        .into_iter()
        .map(|v| v.as_ref().trim().to_string())
        .filter(|v| !v.is_empty() && seen.insert(v.clone()))
        .collect()
}

fn extract_entities(text: &str) -> Vec<String> {
    let capitalized = CAPITALIZED_RUN.find_iter(text).map(|m| m.as_str());
    let acronyms = ACRONYM.find_iter(text).map(|m| m.as_str());
    let emails = EMAIL_ADDRESS.find_iter(text).map(|m| m.as_str());

    let mut entities = distinct(capitalized.chain(acronyms).chain(emails));
    entities.truncate(MAX_ENTITIES);
    entities
}

fn extract_date_hints(text: &str, lower: &str) -> Vec<String> {
    let iso = ISO_DATE.find_iter(text).map(|m| m.as_str());
    let relative = RELATIVE_DATE_HINTS
        .iter()
        .copied()
        .filter(|hint| lower.contains(hint));
    distinct(iso.chain(relative))
}

fn extract_tone_hints(lower: &str) -> Vec<ToneHint> {
    TONE_PATTERNS
        .iter()
        .filter(|(_, re)| re.is_match(lower))
        .map(|(hint, _)| *hint)
        .collect()
}

fn classify_intent(lower: &str) -> QueryIntent {
    if COUNT_INTENT.is_match(lower) {
        QueryIntent::CountByTime
    } else if RECENT_INTENT.is_match(lower) {
        QueryIntent::RecentActivity
    } else if DECISION_INTENT.is_match(lower) {
        QueryIntent::DecisionHistory
    } else if REPLY_INTENT.is_match(lower) {
        QueryIntent::ReplySupport
    } else {
        QueryIntent::GeneralContext
    }
}

fn extract_requested_count(lower: &str) -> Option<u32> {
    let captured = COUNT_AFTER_QUALIFIER
        .captures(lower)
        .or_else(|| COUNT_BEFORE_NOUN.captures(lower))?;
    let n = parse_count_word(captured.get(1)?.as_str())?;
    (n > 0).then_some(n)
}

fn parse_count_word(word: &str) -> Option<u32> {
    let n = match word {
        "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        digits => digits.parse().ok()?,
    };
    Some(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_empty_fields() {
        let n = normalize_input("");
        assert_eq!(n, NormalizedInput::default());
    }

    #[test]
    fn whitespace_is_compacted() {
        let n = normalize_input("  what   did\n\tDana say  ");
        assert_eq!(n.cleaned_text, "what did Dana say");
    }

    #[test]
    fn extracts_capitalized_runs_acronyms_and_emails() {
        let n = normalize_input("notes from Project Atlas sync with OKR owner bob@acme.io about Q3");
        assert!(n.entities.contains(&"Project Atlas".to_string()));
        assert!(n.entities.contains(&"OKR".to_string()));
        assert!(n.entities.contains(&"Q3".to_string()));
        assert!(n.entities.contains(&"bob@acme.io".to_string()));
    }

    #[test]
    fn entities_are_deduplicated_and_capped() {
        let words: Vec<String> = (0..20)
            .map(|i| format!("Name{}", char::from(b'a' + i as u8)))
            .collect();
        let text = format!("{} Dana Dana", words.join(", "));
        let n = normalize_input(&text);
        assert_eq!(n.entities.len(), MAX_ENTITIES);
        let unique: HashSet<_> = n.entities.iter().collect();
        assert_eq!(unique.len(), n.entities.len());
    }

    #[test]
    fn extracts_iso_and_relative_date_hints() {
        let n = normalize_input("what happened on 2026-03-14 and yesterday, also last week");
        assert_eq!(n.date_hints, vec!["2026-03-14", "yesterday", "last week"]);
    }

    #[test]
    fn extracts_tone_hints_in_fixed_order() {
        let n = normalize_input("Need a quick reply on the blocked approval");
        assert_eq!(
            n.tone_hints,
            vec![
                ToneHint::Urgent,
                ToneHint::Delay,
                ToneHint::Decision,
                ToneHint::Reply
            ]
        );
    }

    #[test]
    fn classifies_retrieval_intent() {
        assert_eq!(
            normalize_input("how many meetings with Sam").retrieval_intent,
            QueryIntent::CountByTime
        );
        assert_eq!(
            normalize_input("latest from the vendor").retrieval_intent,
            QueryIntent::RecentActivity
        );
        assert_eq!(
            normalize_input("who approved the launch").retrieval_intent,
            QueryIntent::DecisionHistory
        );
        assert_eq!(
            normalize_input("help me respond to Kim").retrieval_intent,
            QueryIntent::ReplySupport
        );
        assert_eq!(
            normalize_input("context on the Atlas project").retrieval_intent,
            QueryIntent::GeneralContext
        );
    }

    #[test]
    fn extracts_requested_count() {
        assert_eq!(normalize_input("show me 3 emails from Dana").requested_count, Some(3));
        assert_eq!(normalize_input("last two meetings").requested_count, Some(2));
        assert_eq!(normalize_input("top 5").requested_count, Some(5));
        assert_eq!(normalize_input("three recent threads").requested_count, Some(3));
        assert_eq!(normalize_input("emails from Dana").requested_count, None);
        assert_eq!(normalize_input("0 emails").requested_count, None);
    }
}
