//! Telemetry store: interaction log, event log and per-source engagement
//! signals.
//!
//! One store is constructed per process and shared by `Arc`. Signals are kept
//! raw (capped at 10) and normalized to [0, 1] on read (divide by 5, cap 1).
//! Nothing decays with time; engagement bias only saturates.
//!
//! The interaction and event logs are bounded; once full, the oldest entries
//! are evicted. Signals are not bounded: one entry per opened source id.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::memory::types::{Confidence, PlannedCall, RetrievedCount, SourceType};

/// Raw signal ceiling.
const MAX_RAW_SIGNAL: f64 = 10.0;
/// Raw strength that reads as full signal.
const SIGNAL_SATURATION: f64 = 5.0;

/// Default retention for the interaction log.
pub const DEFAULT_MAX_INTERACTIONS: usize = 1_000;
/// Default retention for the event log.
pub const DEFAULT_MAX_EVENTS: usize = 10_000;

const ITEM_OPENED_BUMP: f64 = 1.0;
const FOLLOWUP_BUMP: f64 = 0.5;

/// Characters of user input kept in logs.
pub const INPUT_SUMMARY_CHARS: usize = 240;

/// Truncate user text for logging.
pub fn summarize_input(input: &str) -> String {
    input.chars().take(INPUT_SUMMARY_CHARS).collect()
}

/// Per-candidate score as logged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreRecord {
    pub id: String,
    pub score: f64,
}

/// A planned call that errored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedCall {
    pub tool: SourceType,
    pub query: String,
    pub reason: String,
}

/// Everything recorded about one memory query.
#[derive(Debug, Clone, Serialize)]
pub struct InteractionLog {
    pub interaction_id: Uuid,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub input_summary: String,
    pub session_id: String,
    pub tools_used: Vec<SourceType>,
    pub queries: Vec<PlannedCall>,
    pub retrieved_count: RetrievedCount,
    pub retrieved_ids: Vec<String>,
    pub surfaced_ids: Vec<String>,
    pub scores: Vec<ScoreRecord>,
    pub failed_calls: Vec<FailedCall>,
    pub response_confidence: Confidence,
}

/// Engagement events reported by the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// User opened a surfaced item.
    ItemOpened {
        interaction_id: String,
        source_id: String,
    },
    /// User asked a follow-up after an interaction.
    FollowupPrompt {
        interaction_id: String,
        text_summary: String,
    },
    /// No engagement within the UI timeout. Recorded only.
    NoInteractionTimeout {
        interaction_id: String,
        timeout_s: f64,
    },
}

impl TelemetryEvent {
    /// Build a typed event from a name and an untyped payload. Missing or
    /// mistyped fields become empty/zero; unknown names yield `None`.
    pub fn from_untyped(name: &str, payload: &Value) -> Option<Self> {
        let text = |key: &str| match payload.get(key) {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        let interaction_id = text("interaction_id");

        match name.trim() {
            "item_opened" => Some(Self::ItemOpened {
                interaction_id,
                source_id: text("source_id"),
            }),
            "followup_prompt" => Some(Self::FollowupPrompt {
                interaction_id,
                text_summary: summarize_input(&text("text_summary")),
            }),
            "no_interaction_timeout" => {
                let timeout_s = match payload.get("timeout_s") {
                    Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
                    Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
                    _ => 0.0,
                };
                Some(Self::NoInteractionTimeout {
                    interaction_id,
                    timeout_s,
                })
            }
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ItemOpened { .. } => "item_opened",
            Self::FollowupPrompt { .. } => "followup_prompt",
            Self::NoInteractionTimeout { .. } => "no_interaction_timeout",
        }
    }
}

/// An event as stored.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    #[serde(flatten)]
    pub event: TelemetryEvent,
    pub timestamp: DateTime<Utc>,
}

/// Liveness counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub connector: String,
    pub orchestrator: String,
    pub interactions_logged: usize,
    pub events_logged: usize,
}

/// Interaction logs by id, with insertion order for eviction.
#[derive(Default)]
struct InteractionBook {
    by_id: HashMap<Uuid, InteractionLog>,
    order: VecDeque<Uuid>,
}

impl InteractionBook {
    fn insert(&mut self, log: InteractionLog, capacity: usize) {
        let id = log.interaction_id;
        if self.by_id.insert(id, log).is_none() {
            self.order.push_back(id);
        }
        while self.order.len() > capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.by_id.remove(&oldest);
            }
        }
    }
}

/// Process-wide telemetry state.
pub struct TelemetryStore {
    interactions: RwLock<InteractionBook>,
    events: RwLock<VecDeque<EventRecord>>,
    signals: RwLock<HashMap<String, f64>>,
    max_interactions: usize,
    max_events: usize,
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self {
            interactions: RwLock::default(),
            events: RwLock::default(),
            signals: RwLock::default(),
            max_interactions: DEFAULT_MAX_INTERACTIONS,
            max_events: DEFAULT_MAX_EVENTS,
        }
    }
}

impl TelemetryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store retaining at most `max_interactions` logs and `max_events`
    /// events. Zero is treated as one.
    pub fn with_capacity(max_interactions: usize, max_events: usize) -> Arc<Self> {
        Arc::new(Self {
            max_interactions: max_interactions.max(1),
            max_events: max_events.max(1),
            ..Self::default()
        })
    }

    pub async fn log_interaction(&self, log: InteractionLog) {
        info!(
            interaction_id = %log.interaction_id,
            tools = ?log.tools_used,
            retrieved = log.retrieved_ids.len(),
            surfaced = log.surfaced_ids.len(),
            failed_calls = log.failed_calls.len(),
            confidence = log.response_confidence.as_str(),
            "Memory interaction logged"
        );
        self.interactions
            .write()
            .await
            .insert(log, self.max_interactions);
    }

    pub async fn interaction(&self, interaction_id: Uuid) -> Option<InteractionLog> {
        self.interactions
            .read()
            .await
            .by_id
            .get(&interaction_id)
            .cloned()
    }

    /// Append an event and apply its signal effect.
    pub async fn record_event(&self, event: TelemetryEvent, timestamp: DateTime<Utc>) {
        match &event {
            TelemetryEvent::ItemOpened { source_id, .. } => {
                self.bump_signals(std::slice::from_ref(source_id), ITEM_OPENED_BUMP)
                    .await;
            }
            TelemetryEvent::FollowupPrompt { interaction_id, .. } => {
                let surfaced = match Uuid::parse_str(interaction_id) {
                    Ok(id) => self
                        .interactions
                        .read()
                        .await
                        .by_id
                        .get(&id)
                        .map(|log| log.surfaced_ids.clone())
                        .unwrap_or_default(),
                    Err(_) => Vec::new(),
                };
                if surfaced.is_empty() {
                    debug!(%interaction_id, "Follow-up for unknown interaction, no signal change");
                }
                self.bump_signals(&surfaced, FOLLOWUP_BUMP).await;
            }
            TelemetryEvent::NoInteractionTimeout { .. } => {}
        }

        debug!(event = event.name(), "Telemetry event recorded");
        let mut events = self.events.write().await;
        events.push_back(EventRecord { event, timestamp });
        while events.len() > self.max_events {
            events.pop_front();
        }
    }

    /// Record an event from untyped UI input. Never fails; returns whether
    /// the event was recognized and stored.
    pub async fn log_raw_event(&self, name: &str, payload: &Value) -> bool {
        let Some(event) = TelemetryEvent::from_untyped(name, payload) else {
            debug!(event = name, "Dropping unsupported telemetry event");
            return false;
        };
        let timestamp = payload
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        self.record_event(event, timestamp).await;
        true
    }

    async fn bump_signals(&self, ids: &[String], delta: f64) {
        let mut signals = self.signals.write().await;
        for id in ids.iter().filter(|id| !id.is_empty()) {
            let entry = signals.entry(id.clone()).or_insert(0.0);
            *entry = (*entry + delta).min(MAX_RAW_SIGNAL);
        }
    }

    /// Normalized signal in [0, 1]; 0 for unknown ids.
    pub async fn interaction_signal(&self, source_id: &str) -> f64 {
        let raw = self
            .signals
            .read()
            .await
            .get(source_id)
            .copied()
            .unwrap_or(0.0);
        normalize_signal(raw)
    }

    /// Snapshot of normalized signals for the given ids, for a single ranking
    /// pass. Ids with no signal are omitted.
    pub async fn signals_for<'a, I>(&self, ids: I) -> HashMap<String, f64>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let signals = self.signals.read().await;
        ids.into_iter()
            .filter_map(|id| {
                signals
                    .get(id)
                    .map(|raw| (id.to_string(), normalize_signal(*raw)))
            })
            .collect()
    }

    pub async fn health_snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            connector: "ok".to_string(),
            orchestrator: "ok".to_string(),
            interactions_logged: self.interactions.read().await.by_id.len(),
            events_logged: self.events.read().await.len(),
        }
    }

    pub async fn events(&self) -> Vec<EventRecord> {
        self.events.read().await.iter().cloned().collect()
    }
}

fn normalize_signal(raw: f64) -> f64 {
    (raw / SIGNAL_SATURATION).clamp(0.0, 1.0)
}
