//! Error types for the memory agent.

use crate::memory::types::SourceType;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Contract violation: {0}")]
    Contract(#[from] ContractError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Failed to create {provider} client: {reason}")]
    ClientSetup { provider: String, reason: String },
}

/// Email/calendar backend errors.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("{source_type} search failed: {reason}")]
    RequestFailed {
        source_type: SourceType,
        reason: String,
    },

    #[error("{source_type} search returned an invalid response: {reason}")]
    InvalidResponse {
        source_type: SourceType,
        reason: String,
    },

    #[error("All {failed} planned search calls failed")]
    AllSourcesFailed { failed: usize },
}

/// Outbound response contract violations.
///
/// These indicate a pipeline bug and are never turned into a user-facing
/// envelope.
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("items.len() must be <= {max}, got {count}")]
    TooManyItems { count: usize, max: usize },

    #[error("fallback_message is required when items is empty")]
    MissingFallbackMessage,

    #[error("confidence must be low when items is empty, got {confidence}")]
    ConfidenceMismatch { confidence: String },

    #[error("item {index} is invalid: {reason}")]
    InvalidItem { index: usize, reason: String },

    #[error("source_id {source_id} appears more than once")]
    DuplicateItem { source_id: String },
}

/// Failures of a single memory query.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error(transparent)]
    Contract(#[from] ContractError),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
