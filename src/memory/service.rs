//! Memory query service: runs the pipeline once per request.
//!
//! Flow:
//! 1. Normalize → understand → plan
//! 2. Fan out planned calls concurrently
//! 3. Rank (with an interaction-signal snapshot) → synthesize → validate
//! 4. Log the interaction, return envelope + telemetry
//!
//! There is exactly one retrieval + synthesis cycle per request; synthesis
//! output never feeds back into retrieval.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{RetrievalPolicy, ServiceConfig};
use crate::error::{ConnectorError, QueryError};
use crate::llm::{LlmProvider, create_provider};
use crate::memory::connectors::{
    CalendarSearch, EmailSearch, HttpCalendarSearch, HttpEmailSearch,
};
use crate::memory::meeting_prep::run_meeting_prep;
use crate::memory::normalizer::normalize_input;
use crate::memory::planner::build_query_plan;
use crate::memory::ranker::rank_candidates;
use crate::memory::schema::validate_response;
use crate::memory::synthesizer::{RetrievalFacts, SynthesisContext, round4, synthesize_response};
use crate::memory::telemetry::{
    FailedCall, InteractionLog, ScoreRecord, TelemetryStore, summarize_input,
};
use crate::memory::types::{
    CalendarItem, CallFilters, EmailItem, PlannedCall, ResponseEnvelope, RetrievedCount,
    SourceType,
};
use crate::memory::understanding::interpret_query;

/// One memory query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryQueryRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_input: String,
    #[serde(default)]
    pub session_id: String,
}

/// Outcome of one memory query.
#[derive(Debug, Clone)]
pub struct MemoryQueryResult {
    pub interaction_id: Uuid,
    pub response: ResponseEnvelope,
    pub telemetry: InteractionLog,
}

/// Items returned by one planned call.
enum CallItems {
    Email(Vec<EmailItem>),
    Calendar(Vec<CalendarItem>),
}

/// Runs memory queries against the configured backends.
pub struct MemoryQueryService {
    email: Arc<dyn EmailSearch>,
    calendar: Arc<dyn CalendarSearch>,
    llm: Option<Arc<dyn LlmProvider>>,
    telemetry: Arc<TelemetryStore>,
    policy: RetrievalPolicy,
}

impl MemoryQueryService {
    /// Service with no LLM and the default retrieval policy.
    pub fn new(
        email: Arc<dyn EmailSearch>,
        calendar: Arc<dyn CalendarSearch>,
        telemetry: Arc<TelemetryStore>,
    ) -> Self {
        Self {
            email,
            calendar,
            llm: None,
            telemetry,
            policy: RetrievalPolicy::default(),
        }
    }

    /// Service wired to the HTTP backends and, when configured, an LLM.
    pub fn from_config(
        config: &ServiceConfig,
        telemetry: Arc<TelemetryStore>,
    ) -> crate::Result<Self> {
        let mut service = Self::new(
            Arc::new(HttpEmailSearch::new(config.email_url.clone())),
            Arc::new(HttpCalendarSearch::new(config.calendar_url.clone())),
            telemetry,
        )
        .with_policy(config.policy.clone());

        if let Some(llm_config) = &config.llm {
            let llm = create_provider(llm_config)?;
            info!(model = llm.model_name(), "LLM provider configured");
            service = service.with_llm(llm);
        }
        Ok(service)
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_policy(mut self, policy: RetrievalPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn telemetry(&self) -> &Arc<TelemetryStore> {
        &self.telemetry
    }

    pub async fn run_memory_query(
        &self,
        request: MemoryQueryRequest,
    ) -> Result<MemoryQueryResult, QueryError> {
        self.run_memory_query_at(request, Utc::now()).await
    }

    /// Run the pipeline with an explicit clock.
    pub async fn run_memory_query_at(
        &self,
        request: MemoryQueryRequest,
        now: DateTime<Utc>,
    ) -> Result<MemoryQueryResult, QueryError> {
        let interaction_id = Uuid::new_v4();
        let llm = self.llm.as_deref();

        info!(
            %interaction_id,
            user_id = %request.user_id,
            input = %summarize_input(&request.user_input),
            "Running memory query"
        );

        let normalized = normalize_input(&request.user_input);
        let understanding = interpret_query(llm, &request.user_input, &normalized).await;
        let plan = build_query_plan(&normalized, &understanding, &self.policy, now);

        let outcomes = join_all(plan.calls.iter().map(|call| self.execute(call))).await;

        let mut email_items = Vec::new();
        let mut calendar_items = Vec::new();
        let mut retrieved_count = RetrievedCount::default();
        let mut failed_calls = Vec::new();
        let mut dropped = 0;
        for (call, outcome) in plan.calls.iter().zip(outcomes) {
            match outcome {
                Ok(CallItems::Email(mut items)) => {
                    retrieved_count.email += items.len();
                    let before = items.len();
                    items.retain(|item| !item.id.trim().is_empty());
                    dropped += before - items.len();
                    email_items.extend(items);
                }
                Ok(CallItems::Calendar(mut items)) => {
                    retrieved_count.calendar += items.len();
                    let before = items.len();
                    items.retain(|item| !item.id.trim().is_empty());
                    dropped += before - items.len();
                    calendar_items.extend(items);
                }
                Err(e) => {
                    warn!(%interaction_id, tool = %call.tool, error = %e, "Planned search call failed");
                    failed_calls.push(FailedCall {
                        tool: call.tool,
                        query: call.query.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if dropped > 0 {
            warn!(%interaction_id, dropped, "Dropped backend items without an id");
        }

        if !plan.calls.is_empty() && failed_calls.len() == plan.calls.len() {
            error!(%interaction_id, failed = failed_calls.len(), "Every planned search call failed");
            return Err(ConnectorError::AllSourcesFailed {
                failed: failed_calls.len(),
            }
            .into());
        }

        let mut seen = HashSet::new();
        let retrieved_ids: Vec<String> = email_items
            .iter()
            .map(|i| i.id.as_str())
            .chain(calendar_items.iter().map(|i| i.id.as_str()))
            .filter(|id| seen.insert(*id))
            .map(str::to_string)
            .collect();

        let signals = self
            .telemetry
            .signals_for(retrieved_ids.iter().map(String::as_str))
            .await;
        let ranked = rank_candidates(
            &normalized,
            &email_items,
            &calendar_items,
            |id| signals.get(id).copied().unwrap_or(0.0),
            &self.policy,
            now,
        );

        let tools_used = distinct_tools(&plan.calls);
        let facts = RetrievalFacts {
            tools_used: tools_used.clone(),
            retrieved_count,
            scored_count: ranked.scored.len(),
            failed_calls: failed_calls.len(),
        };
        let ctx = SynthesisContext {
            user_input: &request.user_input,
            understanding: &understanding,
            facts: &facts,
        };
        let response = synthesize_response(llm, &ctx, ranked.confidence, &ranked.surfaced).await;

        if let Err(e) = validate_response(&response) {
            error!(%interaction_id, error = %e, "Response failed contract validation");
            return Err(e.into());
        }

        let telemetry = InteractionLog {
            interaction_id,
            user_id: request.user_id,
            timestamp: now,
            input_summary: summarize_input(&request.user_input),
            session_id: request.session_id,
            tools_used,
            queries: plan.calls,
            retrieved_count,
            retrieved_ids,
            surfaced_ids: response
                .items
                .iter()
                .map(|item| item.source_id.clone())
                .collect(),
            scores: ranked
                .scored
                .iter()
                .map(|row| ScoreRecord {
                    id: row.id().to_string(),
                    score: round4(row.score),
                })
                .collect(),
            failed_calls,
            response_confidence: response.confidence,
        };
        self.telemetry.log_interaction(telemetry.clone()).await;

        Ok(MemoryQueryResult {
            interaction_id,
            response,
            telemetry,
        })
    }

    /// Prep brief for the next upcoming meeting.
    pub async fn meeting_prep(&self) -> Result<ResponseEnvelope, QueryError> {
        run_meeting_prep(self.calendar.as_ref(), self.llm.as_deref(), Utc::now()).await
    }

    async fn execute(&self, call: &PlannedCall) -> Result<CallItems, ConnectorError> {
        match &call.filters {
            CallFilters::Email(filters) => self
                .email
                .search_email(&call.query, filters)
                .await
                .map(|resp| CallItems::Email(resp.items)),
            CallFilters::Calendar(filters) => self
                .calendar
                .search_calendar(&call.query, filters)
                .await
                .map(|resp| CallItems::Calendar(resp.items)),
        }
    }
}

fn distinct_tools(calls: &[PlannedCall]) -> Vec<SourceType> {
    let mut tools = Vec::new();
    for call in calls {
        if !tools.contains(&call.tool) {
            tools.push(call.tool);
        }
    }
    tools
}
