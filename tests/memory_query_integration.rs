//! End-to-end tests for the memory query pipeline.
//!
//! Each test wires a `MemoryQueryService` to in-memory backends and runs
//! the full normalize → plan → retrieve → rank → synthesize → validate path
//! with a fixed clock.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;

use memory_agent::error::LlmError;
use memory_agent::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};
use memory_agent::memory::connectors::{InMemoryCalendarSearch, InMemoryEmailSearch};
use memory_agent::memory::service::{MemoryQueryRequest, MemoryQueryService};
use memory_agent::memory::telemetry::TelemetryStore;
use memory_agent::memory::types::{CalendarItem, Confidence, EmailItem, SourceType};

/// LLM provider that fails every call.
struct BrokenLlm;

#[async_trait]
impl LlmProvider for BrokenLlm {
    fn model_name(&self) -> &str {
        "broken"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        Err(LlmError::RequestFailed {
            provider: "broken".into(),
            reason: "connection reset".into(),
        })
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
}

fn budget_email(id: &str, days_old: i64) -> EmailItem {
    EmailItem {
        id: id.into(),
        thread_id: format!("t-{id}"),
        subject: "Q3 budget: revised numbers".into(),
        from: "Dana Whitfield <dana@acme.com>".into(),
        to: vec!["me@acme.com".into(), "finance@acme.com".into()],
        cc: vec![],
        timestamp: (now() - Duration::days(days_old)).to_rfc3339(),
        snippet: "Here are the revised Q3 budget numbers, including vendor spend and the updated headcount plan.".into(),
        url: format!("https://mail.example.com/{id}"),
    }
}

fn offsite_event() -> CalendarItem {
    CalendarItem {
        id: "c1".into(),
        title: "Team offsite planning".into(),
        start_time: (now() - Duration::days(20)).to_rfc3339(),
        end_time: (now() - Duration::days(20) + Duration::hours(1)).to_rfc3339(),
        organizer: "hr@acme.com".into(),
        attendees: vec!["me@acme.com".into(), "ops@acme.com".into()],
        description_preview: "Venue shortlist and travel logistics for the offsite.".into(),
        url: "https://calendar.example.com/c1".into(),
    }
}

fn request(input: &str) -> MemoryQueryRequest {
    MemoryQueryRequest {
        user_id: "u1".into(),
        user_input: input.into(),
        session_id: "s1".into(),
    }
}

fn service(emails: Vec<EmailItem>, events: Vec<CalendarItem>) -> MemoryQueryService {
    MemoryQueryService::new(
        Arc::new(InMemoryEmailSearch::new(emails)),
        Arc::new(InMemoryCalendarSearch::new(events)),
        TelemetryStore::new(),
    )
}

#[tokio::test]
async fn email_question_surfaces_grounded_email_items() {
    let svc = service(
        vec![budget_email("m1", 1), budget_email("m2", 2), budget_email("m3", 4)],
        vec![offsite_event()],
    );

    let result = svc
        .run_memory_query_at(request("any recent emails about the Q3 budget from Dana?"), now())
        .await
        .unwrap();

    assert_eq!(result.telemetry.tools_used, vec![SourceType::Email]);
    assert!(matches!(
        result.response.confidence,
        Confidence::Medium | Confidence::High
    ));
    assert!(!result.response.items.is_empty());
    assert!(
        result
            .response
            .items
            .iter()
            .all(|item| item.source_type == SourceType::Email)
    );
    assert!(result.response.fallback_message.is_none());
}

#[tokio::test]
async fn empty_input_gives_low_confidence_fallback() {
    let svc = service(vec![], vec![offsite_event()]);

    let result = svc.run_memory_query_at(request(""), now()).await.unwrap();

    assert!(!result.telemetry.queries.is_empty());
    assert_eq!(result.response.confidence, Confidence::Low);
    assert!(result.response.items.is_empty());
    assert!(result.response.fallback_message.is_some());
}

#[tokio::test]
async fn opened_item_outranks_identical_unopened_item() {
    let svc = service(vec![budget_email("m1", 3), budget_email("m2", 3)], vec![]);
    let input = "Q3 budget emails from Dana";

    let first = svc.run_memory_query_at(request(input), now()).await.unwrap();
    assert!(first.telemetry.surfaced_ids.contains(&"m2".to_string()));
    let first_m2 = first
        .telemetry
        .scores
        .iter()
        .find(|s| s.id == "m2")
        .unwrap()
        .score;

    let recorded = svc
        .telemetry()
        .log_raw_event(
            "item_opened",
            &json!({
                "interaction_id": first.interaction_id.to_string(),
                "source_id": "m2",
            }),
        )
        .await;
    assert!(recorded);
    assert!(svc.telemetry().interaction_signal("m2").await > 0.0);

    let second = svc
        .run_memory_query_at(request(input), now() + Duration::hours(1))
        .await
        .unwrap();
    let ids: Vec<&str> = second.telemetry.scores.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["m2", "m1"]);
    assert!(second.telemetry.scores[0].score > second.telemetry.scores[1].score);
    assert!(second.telemetry.scores[0].score >= first_m2 - 1e-3);
    assert_eq!(second.response.items[0].source_id, "m2");
}

#[tokio::test]
async fn failing_llm_matches_no_llm() {
    let emails = vec![budget_email("m1", 1), budget_email("m2", 40)];
    let events = vec![offsite_event()];
    let plain = service(emails.clone(), events.clone());
    let broken = service(emails, events).with_llm(Arc::new(BrokenLlm));

    for input in [
        "any recent emails about the Q3 budget from Dana?",
        "what did we decide about the offsite last week",
        "",
    ] {
        let a = plain.run_memory_query_at(request(input), now()).await.unwrap();
        let b = broken.run_memory_query_at(request(input), now()).await.unwrap();
        assert_eq!(a.response, b.response, "input: {input:?}");
        assert_eq!(a.telemetry.queries, b.telemetry.queries);
        assert_eq!(a.telemetry.scores, b.telemetry.scores);
        assert_eq!(a.telemetry.surfaced_ids, b.telemetry.surfaced_ids);
    }
}

#[tokio::test]
async fn envelope_only_cites_retrieved_items() {
    let emails: Vec<_> = (0..10)
        .map(|i| budget_email(&format!("m{i}"), i + 1))
        .collect();
    let svc = service(emails, vec![offsite_event()]);

    let result = svc
        .run_memory_query_at(request("urgent: Q3 budget emails from Dana"), now())
        .await
        .unwrap();

    let items = &result.response.items;
    assert!(items.len() <= 5);
    assert_eq!(result.telemetry.surfaced_ids.len(), items.len());
    for item in items {
        assert!(result.telemetry.retrieved_ids.contains(&item.source_id));
    }

    let mut ids: Vec<_> = result.telemetry.scores.iter().map(|s| s.id.clone()).collect();
    let total = ids.len();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), total);
}

#[tokio::test]
async fn every_interaction_is_logged() {
    let svc = service(vec![budget_email("m1", 1)], vec![]);
    for input in ["Q3 budget from Dana", "", "offsite"] {
        svc.run_memory_query_at(request(input), now()).await.unwrap();
    }
    let health = svc.telemetry().health_snapshot().await;
    assert_eq!(health.interactions_logged, 3);
    assert_eq!(health.events_logged, 0);
}
