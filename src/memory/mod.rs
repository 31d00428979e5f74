//! Memory agent: answers natural-language questions over a user's email
//! and calendar.
//!
//! Stages, in request order:
//! - `normalizer`: cleaned text, entities, time hints
//! - `understanding`: intent, source preference, date constraint, variants
//! - `planner`: bounded set of backend calls
//! - `connectors`: email/calendar search backends
//! - `ranker`: scoring, dedup, gating, confidence
//! - `synthesizer`: summary + items, LLM-assisted or deterministic
//! - `schema`: outbound contract check
//! - `telemetry`: interaction log, UI events, interaction signal
//!
//! `service` wires the stages together; `routes` exposes them over HTTP.

pub mod connectors;
pub mod json;
pub mod meeting_prep;
pub mod normalizer;
pub mod planner;
pub mod ranker;
pub mod routes;
pub mod schema;
pub mod service;
pub mod synthesizer;
pub mod telemetry;
pub mod types;
pub mod understanding;

#[cfg(test)]
pub(crate) mod testing;
