//! Configuration types.

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};

/// Bounds on how much retrieval a single query may perform.
#[derive(Debug, Clone)]
pub struct RetrievalPolicy {
    /// Default lookback when the query carries no date constraint.
    pub time_window_months: u32,
    /// Upper bound on `max_results` for any backend call.
    pub max_results_per_call: u32,
    /// Upper bound on planned calls across all tools.
    pub max_calls_per_request: usize,
    /// Maximum number of surfaced items.
    pub max_surfaced_items: usize,
    /// Surfaced count the ranker backfills towards from the "maybe" band.
    pub target_surfaced_items: usize,
    /// Maximum query variants per tool.
    pub max_variants_per_tool: usize,
}

impl Default for RetrievalPolicy {
    fn default() -> Self {
        Self {
            time_window_months: 12,
            max_results_per_call: 25,
            max_calls_per_request: 4,
            max_surfaced_items: 5,
            target_surfaced_items: 3,
            max_variants_per_tool: 2,
        }
    }
}

/// Process-level service configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// HTTP listen port.
    pub port: u16,
    /// Endpoint speaking the email search contract.
    pub email_url: String,
    /// Endpoint speaking the calendar search contract.
    pub calendar_url: String,
    /// LLM settings. `None` runs every stage on its deterministic path.
    pub llm: Option<LlmConfig>,
    pub policy: RetrievalPolicy,
}

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4.1-mini";

impl ServiceConfig {
    /// Load configuration from `MEMORY_AGENT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match lookup("MEMORY_AGENT_PORT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "MEMORY_AGENT_PORT".to_string(),
                message: format!("'{raw}' is not a valid port"),
            })?,
            None => DEFAULT_PORT,
        };

        let email_url = lookup("MEMORY_AGENT_EMAIL_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("MEMORY_AGENT_EMAIL_URL".to_string()))?;
        let calendar_url = lookup("MEMORY_AGENT_CALENDAR_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("MEMORY_AGENT_CALENDAR_URL".to_string()))?;

        let backend = match lookup("MEMORY_AGENT_LLM_BACKEND").as_deref() {
            None | Some("anthropic") => LlmBackend::Anthropic,
            Some("openai") => LlmBackend::OpenAi,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "MEMORY_AGENT_LLM_BACKEND".to_string(),
                    message: format!("unknown backend '{other}', expected anthropic or openai"),
                });
            }
        };

        let llm = lookup("MEMORY_AGENT_LLM_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .map(|api_key| {
                let model = lookup("MEMORY_AGENT_LLM_MODEL").unwrap_or_else(|| {
                    match backend {
                        LlmBackend::Anthropic => DEFAULT_ANTHROPIC_MODEL,
                        LlmBackend::OpenAi => DEFAULT_OPENAI_MODEL,
                    }
                    .to_string()
                });
                LlmConfig {
                    backend,
                    api_key: SecretString::from(api_key),
                    model,
                }
            });

        Ok(Self {
            port,
            email_url,
            calendar_url,
            llm,
            policy: RetrievalPolicy::default(),
        })
    }
}
