//! Meeting prep: a brief for the next upcoming calendar event.
//!
//! Looks ahead two weeks, picks the earliest event and asks the LLM for a
//! structured brief grounded only in the invite. Without a usable LLM reply
//! the brief is built from the invite text itself.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::QueryError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::memory::connectors::CalendarSearch;
use crate::memory::json::decode_json_object;
use crate::memory::schema::validate_response;
use crate::memory::synthesizer::{LOW_CONFIDENCE_MESSAGE, result_item};
use crate::memory::types::{
    CalendarFilters, CalendarItem, Candidate, Confidence, ResponseEnvelope, parse_item_timestamp,
};

const LOOKAHEAD_DAYS: i64 = 14;
const LOOKAHEAD_MAX_EVENTS: u32 = 3;
const PREP_MAX_TOKENS: u32 = 320;
const PREP_ITEM_SCORE: f64 = 0.9;
const PREP_WHY_RELEVANT: &str = "next scheduled meeting";

pub const NO_MEETING_SUMMARY: &str = "No upcoming meeting found to prepare for.";

const DEFAULT_OBJECTIVE: &str = "Clarify the meeting objective based on the invite.";
const STOCK_QUESTIONS: [&str; 2] = [
    "What are the top outcomes expected in the first 90 days?",
    "How is product success measured for this role?",
];

/// Build a prep brief for the next meeting after `now`.
pub async fn run_meeting_prep(
    calendar: &dyn CalendarSearch,
    llm: Option<&dyn LlmProvider>,
    now: DateTime<Utc>,
) -> Result<ResponseEnvelope, QueryError> {
    let filters = CalendarFilters {
        date_from: now,
        date_to: now + Duration::days(LOOKAHEAD_DAYS),
        attendees: Vec::new(),
        max_results: LOOKAHEAD_MAX_EVENTS,
    };
    let events = calendar.search_calendar("", &filters).await?.items;

    let envelope = match next_event(events) {
        None => ResponseEnvelope {
            summary: NO_MEETING_SUMMARY.to_string(),
            confidence: Confidence::Low,
            items: Vec::new(),
            fallback_message: Some(LOW_CONFIDENCE_MESSAGE.to_string()),
        },
        Some(event) => {
            info!(event_id = %event.id, title = %event.title, "Preparing brief for next meeting");
            let brief = match llm {
                Some(llm) => llm_brief(llm, &event).await,
                None => None,
            };
            let (summary, confidence) =
                brief.unwrap_or_else(|| (raw_invite_summary(&event), Confidence::Medium));
            ResponseEnvelope {
                summary,
                confidence,
                items: vec![result_item(
                    &Candidate::Calendar(event),
                    PREP_WHY_RELEVANT,
                    PREP_ITEM_SCORE,
                )],
                fallback_message: None,
            }
        }
    };

    validate_response(&envelope)?;
    Ok(envelope)
}

/// Earliest event with an id. Unparsable start times sort last.
fn next_event(events: Vec<CalendarItem>) -> Option<CalendarItem> {
    events
        .into_iter()
        .filter(|e| !e.id.trim().is_empty())
        .min_by_key(|e| {
            let start = parse_item_timestamp(&e.start_time);
            (start.is_none(), start)
        })
}

fn event_title(event: &CalendarItem) -> String {
    Candidate::Calendar(event.clone()).title()
}

fn raw_invite_summary(event: &CalendarItem) -> String {
    format!(
        "Next meeting is \"{}\". I could not generate the full prep brief, so this is the raw invite context.\n\n{}",
        event_title(event),
        mini_brief(event)
    )
}

/// Objective, talking points from the invite lines, and stock questions.
fn mini_brief(event: &CalendarItem) -> String {
    let title = event_title(event);
    let context = format!("{} {}", title, event.description_preview);
    // Never empty: the title is at least a placeholder.
    let points = context
        .trim()
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(4);

    [
        format!("Objective: Prepare for \"{title}\" using the invite details."),
        format!("Talking points:\n{}", bullet_lines(points)),
        format!("Questions to ask:\n{}", bullet_lines(STOCK_QUESTIONS)),
    ]
    .join("\n\n")
}

fn bullet_lines<I, S>(lines: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .map(|l| format!("- {}", l.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn non_blank<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn build_prep_system_prompt() -> String {
    "You are a meeting prep assistant.\n\
     Use ONLY this meeting invite context. Do not invent facts.\n\
     Return JSON only with this exact schema:\n\
     {\"summary\":\"string\",\"confidence\":\"high|medium|low\",\"objective\":\"string\",\"talking_points\":[\"string\"],\"smart_questions\":[\"string\"],\"recommended_opener\":\"string\",\"risks\":[\"string\"],\"next_steps\":[\"string\"]}\n\
     Keep language practical and concise."
        .to_string()
}

/// Summary and confidence from the LLM, or `None` to use the raw invite.
async fn llm_brief(llm: &dyn LlmProvider, event: &CalendarItem) -> Option<(String, Confidence)> {
    let context = serde_json::to_string(event).unwrap_or_default();
    let request = CompletionRequest::new(vec![
        ChatMessage::system(build_prep_system_prompt()),
        ChatMessage::user(format!("Meeting context: {context}")),
    ])
    .with_max_tokens(PREP_MAX_TOKENS);

    let reply = match llm.complete(request).await {
        Ok(response) => response.content,
        Err(e) => {
            warn!(error = %e, "Meeting prep LLM call failed, using raw invite");
            return None;
        }
    };

    let Some(parsed) = decode_json_object::<Value>(&reply) else {
        warn!("Undecodable meeting prep reply, using raw invite");
        return None;
    };
    let summary = parsed.get("summary").and_then(Value::as_str)?.trim().to_string();

    let list = |key: &str, max: usize| -> Option<String> {
        let items: Vec<String> = parsed
            .get(key)?
            .as_array()?
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .take(max)
            .collect();
        (!items.is_empty()).then(|| bullet_lines(items))
    };

    let mut sections = vec![format!(
        "Objective: {}",
        non_blank(&parsed, "objective").unwrap_or(DEFAULT_OBJECTIVE)
    )];
    if let Some(lines) = list("talking_points", 4) {
        sections.push(format!("Talking points:\n{lines}"));
    }
    if let Some(lines) = list("smart_questions", 3) {
        sections.push(format!("Questions to ask:\n{lines}"));
    }
    if let Some(opener) = non_blank(&parsed, "recommended_opener") {
        sections.push(format!("Opener: {opener}"));
    }
    if let Some(lines) = list("risks", 3) {
        sections.push(format!("Risks:\n{lines}"));
    }
    if let Some(lines) = list("next_steps", 3) {
        sections.push(format!("Suggested next steps:\n{lines}"));
    }

    let confidence = parsed
        .get("confidence")
        .and_then(Value::as_str)
        .and_then(Confidence::parse)
        .unwrap_or(Confidence::Medium);

    Some((format!("{summary}\n\n{}", sections.join("\n\n")), confidence))
}
