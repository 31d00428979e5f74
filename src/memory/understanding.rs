//! Query understanding: LLM-backed intent classification with a total
//! rule-based fallback.
//!
//! Flow:
//! 1. No LLM configured → rule-based classifier
//! 2. LLM call → best-effort JSON decode → `QueryUnderstanding::from_untyped`
//! 3. LLM error or undecodable output → rule-based classifier
//!
//! Everything downstream trusts the returned value, so LLM output is coerced
//! field by field and never partially trusted.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::memory::json::decode_json_object;
use crate::memory::normalizer::{MAX_ENTITIES, distinct};
use crate::memory::types::{
    DateConstraint, DateConstraintType, NormalizedInput, QueryIntent, QueryUnderstanding,
    QueryVariants, SourcePreference,
};

/// Max tokens for the classification call.
const UNDERSTANDING_MAX_TOKENS: u32 = 220;

/// Max query variants kept per tool.
const MAX_VARIANTS: usize = 2;

/// Upper bound for a requested item count.
const MAX_REQUESTED_COUNT: u32 = 5;

static EMAIL_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"email|emails|inbox|message|messages|thread|sender|sent").expect("valid regex")
});

static CALENDAR_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"calendar|meeting|event|schedule|invite|attendee").expect("valid regex")
});

/// Produce a `QueryUnderstanding`, using the LLM when one is available.
pub async fn interpret_query(
    llm: Option<&dyn LlmProvider>,
    user_input: &str,
    normalized: &NormalizedInput,
) -> QueryUnderstanding {
    let Some(llm) = llm else {
        return fallback_understanding(normalized);
    };

    let request = CompletionRequest::new(vec![
        ChatMessage::system(build_understanding_system_prompt()),
        ChatMessage::user(format!("User input: {user_input}")),
    ])
    .with_max_tokens(UNDERSTANDING_MAX_TOKENS)
    .with_temperature(0.0);

    let response = match llm.complete(request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(
                error = %e,
                model = llm.model_name(),
                "Query understanding LLM call failed, using rules"
            );
            return fallback_understanding(normalized);
        }
    };

    match decode_json_object::<Value>(&response.content) {
        Some(raw) => {
            let understanding = QueryUnderstanding::from_untyped(&raw, normalized);
            debug!(
                intent = ?understanding.intent,
                source = ?understanding.source_preference,
                "Query understood by LLM"
            );
            understanding
        }
        None => {
            warn!(
                raw_response = %response.content,
                "Undecodable query understanding response, using rules"
            );
            fallback_understanding(normalized)
        }
    }
}

fn build_understanding_system_prompt() -> String {
    "Classify the user query for a memory retrieval system over email and calendar.\n\
     Return JSON only, no explanations. Schema:\n\
     {\n\
       \"intent\": \"recent_activity|count_by_time|decision_history|reply_support|general_context\",\n\
       \"source_preference\": \"email|calendar|both\",\n\
       \"requested_count\": number|null,\n\
       \"date_constraints\": {\"type\": \"none|yesterday|today|last_7_days|last_30_days|iso_range\", \"date_from\": string|null, \"date_to\": string|null},\n\
       \"entities\": [string],\n\
       \"query_variants_by_tool\": {\"email\": [string], \"calendar\": [string]}\n\
     }\n\
     Constraints: max 2 query variants per tool, concise search-style variants."
        .to_string()
}

/// Deterministic keyword classifier. Total: never fails.
pub fn fallback_understanding(normalized: &NormalizedInput) -> QueryUnderstanding {
    let lower = normalized.cleaned_text.to_lowercase();
    let email_signal = EMAIL_KEYWORDS.is_match(&lower);
    let calendar_signal = CALENDAR_KEYWORDS.is_match(&lower);

    let source_preference = match (email_signal, calendar_signal) {
        (true, false) => SourcePreference::Email,
        (false, true) => SourcePreference::Calendar,
        _ => SourcePreference::Both,
    };

    QueryUnderstanding {
        intent: normalized.retrieval_intent,
        source_preference,
        requested_count: normalized.requested_count.map(clamp_count),
        entities: normalized.entities.clone(),
        date_constraint: DateConstraint {
            kind: date_type_from_hints(&normalized.date_hints),
            date_from: None,
            date_to: None,
        },
        // Left empty so the planner derives variants from the normalizer.
        query_variants_by_tool: QueryVariants::default(),
    }
}

fn date_type_from_hints(hints: &[String]) -> DateConstraintType {
    let has = |needle: &str| hints.iter().any(|h| h == needle);
    if has("yesterday") {
        DateConstraintType::Yesterday
    } else if has("today") {
        DateConstraintType::Today
    } else if has("this week") || has("last week") {
        DateConstraintType::Last7Days
    } else if has("this month") || has("last month") {
        DateConstraintType::Last30Days
    } else {
        DateConstraintType::None
    }
}

fn clamp_count(n: u32) -> u32 {
    n.clamp(1, MAX_REQUESTED_COUNT)
}

impl QueryUnderstanding {
    /// Build a fully-typed understanding from an untyped map.
    ///
    /// Every field is validated independently: unknown enum values fall back
    /// to `general_context` / `both` / `none`, counts clamp to 1..=5, string
    /// lists are trimmed, deduplicated and capped.
    pub fn from_untyped(raw: &Value, normalized: &NormalizedInput) -> Self {
        let intent = raw
            .get("intent")
            .and_then(Value::as_str)
            .and_then(QueryIntent::parse)
            .unwrap_or_default();

        let source_preference = match raw.get("source_preference").and_then(Value::as_str) {
            Some("email") => SourcePreference::Email,
            Some("calendar") => SourcePreference::Calendar,
            _ => SourcePreference::Both,
        };

        let requested_count = raw
            .get("requested_count")
            .and_then(positive_integer)
            .or(normalized.requested_count)
            .map(clamp_count);

        let mut entities = string_list(raw.get("entities"));
        entities.truncate(MAX_ENTITIES);

        let constraints = raw.get("date_constraints").or_else(|| raw.get("date_constraint"));
        let kind = constraints
            .and_then(|c| c.get("type"))
            .and_then(Value::as_str)
            .and_then(DateConstraintType::parse)
            .unwrap_or_default();
        let date_field = |key: &str| {
            constraints
                .and_then(|c| c.get(key))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let variants = raw.get("query_variants_by_tool");
        let variants_for = |tool: &str| {
            let mut list = string_list(variants.and_then(|v| v.get(tool)));
            list.truncate(MAX_VARIANTS);
            list
        };

        Self {
            intent,
            source_preference,
            requested_count,
            entities,
            date_constraint: DateConstraint {
                kind,
                date_from: date_field("date_from"),
                date_to: date_field("date_to"),
            },
            query_variants_by_tool: QueryVariants {
                email: variants_for("email"),
                calendar: variants_for("calendar"),
            },
        }
    }
}

/// Positive integral JSON number (or numeric string), else `None`.
fn positive_integer(value: &Value) -> Option<u32> {
    let n = match value {
        Value::Number(n) => {
            let f = n.as_f64()?;
            if f.fract() != 0.0 {
                return None;
            }
            f
        }
        Value::String(s) => s.trim().parse::<u32>().ok()? as f64,
        _ => return None,
    };
    if n < 1.0 {
        return None;
    }
    Some(n.min(f64::from(u32::MAX)) as u32)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    distinct(items.iter().filter_map(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }))
}
