//! Mock LLM providers shared by unit tests.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::LlmError;
use crate::llm::{CompletionRequest, CompletionResponse, LlmProvider};

/// Always replies with the same text and records every prompt it sees.
pub struct FixedLlm {
    reply: String,
    prompts: Mutex<Vec<String>>,
}

impl FixedLlm {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Preamble + prompt of each request, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for FixedLlm {
    fn model_name(&self) -> &str {
        "fixed"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let seen = format!(
            "{}\n{}",
            request.preamble().unwrap_or_default(),
            request.prompt()
        );
        self.prompts.lock().unwrap().push(seen);
        Ok(CompletionResponse {
            content: self.reply.clone(),
        })
    }
}

/// Every call fails.
pub struct FailingLlm;

#[async_trait]
impl LlmProvider for FailingLlm {
    fn model_name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        Err(LlmError::RequestFailed {
            provider: "failing".into(),
            reason: "boom".into(),
        })
    }
}
