//! Synthesizer: turns the surfaced set into the response envelope.
//!
//! Items are always built directly from the surfaced candidates, so every
//! citation exists in retrieved evidence. The summary is a deterministic
//! sentence unless an LLM produces a usable grounded one.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::memory::types::{
    Candidate, Confidence, QueryUnderstanding, ResponseEnvelope, ResultItem, RetrievedCount,
    ScoredCandidate, SourceType,
};

/// Shown whenever nothing is surfaced.
pub const LOW_CONFIDENCE_MESSAGE: &str = "I didn\u{2019}t find anything clearly relevant.";

/// Maximum items in an envelope.
pub const MAX_RESPONSE_ITEMS: usize = 5;

const SUMMARY_MAX_TOKENS: u32 = 180;
const EVIDENCE_SNIPPET_CHARS: usize = 260;

static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>()\[\]"']+"#).expect("valid regex"));

/// What the retrieval stage did, shown to the LLM so it can answer count and
/// recency questions directly.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalFacts {
    pub tools_used: Vec<SourceType>,
    pub retrieved_count: RetrievedCount,
    pub scored_count: usize,
    pub failed_calls: usize,
}

/// Everything the synthesizer needs besides the ranked rows.
pub struct SynthesisContext<'a> {
    pub user_input: &'a str,
    pub understanding: &'a QueryUnderstanding,
    pub facts: &'a RetrievalFacts,
}

/// One row of evidence in the LLM prompt.
#[derive(Serialize)]
struct Evidence<'a> {
    rank: usize,
    source_type: SourceType,
    source_id: &'a str,
    title: String,
    date: &'a str,
    participants: Vec<String>,
    snippet: String,
}

pub(crate) fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// Build a `ResultItem` for a candidate.
pub(crate) fn result_item(candidate: &Candidate, why_relevant: &str, score: f64) -> ResultItem {
    ResultItem {
        title: candidate.title(),
        source_type: candidate.source_type(),
        source_id: candidate.id().to_string(),
        why_relevant: why_relevant.to_string(),
        date: candidate.date().to_string(),
        participants: candidate.participants(),
        snippet: candidate.snippet().to_string(),
        url: candidate.url().to_string(),
        score: round4(score),
    }
}

/// The low-confidence envelope with no items.
pub fn empty_envelope() -> ResponseEnvelope {
    ResponseEnvelope {
        summary: String::new(),
        confidence: Confidence::Low,
        items: Vec::new(),
        fallback_message: Some(LOW_CONFIDENCE_MESSAGE.to_string()),
    }
}

/// Deterministic summary over the surfaced rows.
pub fn deterministic_summary(surfaced: &[ScoredCandidate], confidence: Confidence) -> String {
    let Some(top) = surfaced.first() else {
        return String::new();
    };
    let first = format!(
        "Top relevant context is {} ({}, {}).",
        top.candidate.title(),
        top.source_type(),
        top.id()
    );
    if surfaced.len() == 1 {
        return first;
    }
    if confidence == Confidence::High {
        let more = surfaced.len() - 1;
        let noun = if more > 1 { "items" } else { "item" };
        format!("{first} Also found {more} related {noun} grounded in retrieved sources.")
    } else {
        format!("{first} Relevance may be partial based on available matches.")
    }
}

/// Produce the response envelope for the surfaced set.
pub async fn synthesize_response(
    llm: Option<&dyn LlmProvider>,
    ctx: &SynthesisContext<'_>,
    confidence: Confidence,
    surfaced: &[ScoredCandidate],
) -> ResponseEnvelope {
    let rows = &surfaced[..surfaced.len().min(MAX_RESPONSE_ITEMS)];
    if rows.is_empty() {
        return empty_envelope();
    }

    let items: Vec<ResultItem> = rows
        .iter()
        .map(|row| result_item(&row.candidate, &row.why_relevant, row.score))
        .collect();

    let fallback = deterministic_summary(rows, confidence);
    let summary = match llm {
        Some(llm) => llm_summary(llm, ctx, rows, &items)
            .await
            .unwrap_or(fallback),
        None => fallback,
    };

    ResponseEnvelope {
        summary,
        confidence,
        items,
        fallback_message: None,
    }
}

/// Ask the LLM for a grounded summary. `None` means use the fallback.
async fn llm_summary(
    llm: &dyn LlmProvider,
    ctx: &SynthesisContext<'_>,
    rows: &[ScoredCandidate],
    items: &[ResultItem],
) -> Option<String> {
    let evidence: Vec<Evidence<'_>> = rows
        .iter()
        .enumerate()
        .map(|(i, row)| Evidence {
            rank: i + 1,
            source_type: row.source_type(),
            source_id: row.id(),
            title: row.candidate.title(),
            date: row.candidate.date(),
            participants: row.candidate.participants(),
            snippet: row
                .candidate
                .snippet()
                .chars()
                .take(EVIDENCE_SNIPPET_CHARS)
                .collect(),
        })
        .collect();

    let prompt = format!(
        "User prompt: {}\nQuery understanding: {}\nRetrieval facts: {}\nEvidence: {}",
        ctx.user_input,
        to_json(ctx.understanding),
        to_json(ctx.facts),
        to_json(&evidence),
    );

    let request = CompletionRequest::new(vec![
        ChatMessage::system(build_summary_system_prompt()),
        ChatMessage::user(prompt),
    ])
    .with_max_tokens(SUMMARY_MAX_TOKENS);

    let text = match llm.complete(request).await {
        Ok(response) => response.content.trim().to_string(),
        Err(e) => {
            warn!(error = %e, model = llm.model_name(), "Summary LLM call failed, using fallback");
            return None;
        }
    };

    if text.is_empty() {
        debug!("Empty LLM summary, using fallback");
        return None;
    }

    let known: HashSet<&str> = items
        .iter()
        .map(|item| item.url.as_str())
        .filter(|url| !url.is_empty())
        .collect();
    let unknown = URL
        .find_iter(&text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']))
        .find(|url| !known.contains(url));
    if let Some(url) = unknown {
        warn!(url, "LLM summary cited a link outside the evidence, using fallback");
        return None;
    }

    Some(text)
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn build_summary_system_prompt() -> String {
    "You are a grounded assistant.\n\
     Answer in 1-3 sentences using only the provided evidence.\n\
     If the user asks for counts or most recent senders, answer that directly from the facts.\n\
     Do not invent facts and do not mention any source id not listed."
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::testing::{FailingLlm, FixedLlm};
    use crate::memory::types::{CalendarItem, EmailItem, ScoreBreakdown};

    fn row(id: &str, score: f64) -> ScoredCandidate {
        ScoredCandidate {
            candidate: Candidate::Email(EmailItem {
                id: id.into(),
                subject: format!("Subject {id}"),
                from: "dana@acme.com".into(),
                to: vec!["me@acme.com".into()],
                timestamp: "2026-10-01T09:00:00Z".into(),
                snippet: "x".repeat(400),
                url: format!("https://mail.example.com/{id}"),
                ..Default::default()
            }),
            score,
            breakdown: ScoreBreakdown::default(),
            why_relevant: "entity match: Dana".into(),
        }
    }

    fn ctx_parts() -> (QueryUnderstanding, RetrievalFacts) {
        (QueryUnderstanding::default(), RetrievalFacts::default())
    }

    async fn synth(
        llm: Option<&dyn LlmProvider>,
        confidence: Confidence,
        rows: &[ScoredCandidate],
    ) -> ResponseEnvelope {
        let (understanding, facts) = ctx_parts();
        let ctx = SynthesisContext {
            user_input: "budget from Dana",
            understanding: &understanding,
            facts: &facts,
        };
        synthesize_response(llm, &ctx, confidence, rows).await
    }

    #[tokio::test]
    async fn empty_surfaced_short_circuits() {
        let llm = FixedLlm::new("should not be called");
        let env = synth(Some(&llm as &dyn LlmProvider), Confidence::Medium, &[]).await;
        assert_eq!(env, empty_envelope());
        assert_eq!(env.fallback_message.as_deref(), Some(LOW_CONFIDENCE_MESSAGE));
        assert!(llm.prompts().is_empty());
    }

    #[tokio::test]
    async fn deterministic_summary_single_item() {
        let env = synth(None, Confidence::Medium, &[row("m1", 0.6)]).await;
        assert_eq!(
            env.summary,
            "Top relevant context is Subject m1 (email, m1)."
        );
        assert_eq!(env.items.len(), 1);
        assert!(env.fallback_message.is_none());
    }

    #[tokio::test]
    async fn deterministic_summary_high_counts_related_items() {
        let rows = [row("a", 0.9), row("b", 0.8), row("c", 0.75)];
        let env = synth(None, Confidence::High, &rows).await;
        assert_eq!(
            env.summary,
            "Top relevant context is Subject a (email, a). Also found 2 related items grounded in retrieved sources."
        );
        let two = synth(None, Confidence::High, &rows[..2]).await;
        assert!(two.summary.ends_with("Also found 1 related item grounded in retrieved sources."));
    }

    #[tokio::test]
    async fn deterministic_summary_medium_hedges() {
        let rows = [row("a", 0.8), row("b", 0.6)];
        let env = synth(None, Confidence::Medium, &rows).await;
        assert!(env.summary.ends_with("Relevance may be partial based on available matches."));
    }

    #[tokio::test]
    async fn items_are_capped_and_scores_rounded() {
        let rows: Vec<_> = (0..7).map(|i| row(&format!("m{i}"), 0.812_345_67)).collect();
        let env = synth(None, Confidence::High, &rows).await;
        assert_eq!(env.items.len(), MAX_RESPONSE_ITEMS);
        assert_eq!(env.items[0].score, 0.8123);
        assert_eq!(env.items[0].participants, vec!["dana@acme.com", "me@acme.com"]);
    }

    #[tokio::test]
    async fn llm_summary_is_used_and_prompt_carries_evidence() {
        let llm = FixedLlm::new("  Dana sent the Q3 budget on Oct 1.  ");
        let env = synth(
            Some(&llm as &dyn LlmProvider),
            Confidence::Medium,
            &[row("m1", 0.6)],
        )
        .await;
        assert_eq!(env.summary, "Dana sent the Q3 budget on Oct 1.");

        let prompts = llm.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("You are a grounded assistant."));
        assert!(prompts[0].contains("\"source_id\":\"m1\""));
        assert!(prompts[0].contains(&"x".repeat(EVIDENCE_SNIPPET_CHARS)));
        assert!(!prompts[0].contains(&"x".repeat(EVIDENCE_SNIPPET_CHARS + 1)));
    }

    #[tokio::test]
    async fn llm_failure_or_empty_output_uses_fallback() {
        let rows = [row("m1", 0.6)];
        let expected = "Top relevant context is Subject m1 (email, m1).";

        let failing = synth(Some(&FailingLlm as &dyn LlmProvider), Confidence::Medium, &rows).await;
        assert_eq!(failing.summary, expected);

        let blank = FixedLlm::new("   ");
        let blank = synth(Some(&blank as &dyn LlmProvider), Confidence::Medium, &rows).await;
        assert_eq!(blank.summary, expected);
    }

    #[tokio::test]
    async fn llm_summary_with_foreign_link_is_rejected() {
        let rows = [row("m1", 0.6)];
        let rogue = FixedLlm::new("See https://evil.example.com/phish for details.");
        let env = synth(Some(&rogue as &dyn LlmProvider), Confidence::Medium, &rows).await;
        assert_eq!(env.summary, "Top relevant context is Subject m1 (email, m1).");

        let cited = FixedLlm::new("Budget is at https://mail.example.com/m1.");
        let env = synth(Some(&cited as &dyn LlmProvider), Confidence::Medium, &rows).await;
        assert_eq!(env.summary, "Budget is at https://mail.example.com/m1.");
    }

    #[tokio::test]
    async fn calendar_items_use_event_fields() {
        let event = ScoredCandidate {
            candidate: Candidate::Calendar(CalendarItem {
                id: "e1".into(),
                title: String::new(),
                start_time: "2026-10-20".into(),
                organizer: "priya@acme.com".into(),
                attendees: vec!["me@acme.com".into()],
                description_preview: "agenda".into(),
                url: "https://cal.example.com/e1".into(),
                ..Default::default()
            }),
            score: 0.6,
            breakdown: ScoreBreakdown::default(),
            why_relevant: "semantic relevance to prompt".into(),
        };
        let env = synth(None, Confidence::Medium, &[event]).await;
        let item = &env.items[0];
        assert_eq!(item.title, "(No title)");
        assert_eq!(item.source_type, SourceType::Calendar);
        assert_eq!(item.date, "2026-10-20");
        assert_eq!(item.snippet, "agenda");
        assert_eq!(item.participants[0], "priya@acme.com");
    }
}
