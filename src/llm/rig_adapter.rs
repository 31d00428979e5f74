//! Bridges a rig-core `CompletionModel` to our `LlmProvider` trait.

use async_trait::async_trait;
use rig::agent::AgentBuilder;
use rig::completion::{CompletionModel, Prompt};

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};

/// Adapter wrapping any rig completion model.
pub struct RigAdapter<M: CompletionModel> {
    model: M,
    model_name: String,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
        }
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut builder = AgentBuilder::new(self.model.clone());
        if let Some(preamble) = request.preamble() {
            builder = builder.preamble(&preamble);
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        let agent = builder.build();

        let prompt = request.prompt();
        let content: String =
            agent
                .prompt(prompt.as_str())
                .await
                .map_err(|e| LlmError::RequestFailed {
                    provider: self.model_name.clone(),
                    reason: e.to_string(),
                })?;

        tracing::debug!(
            model = %self.model_name,
            chars = content.len(),
            "LLM completion finished"
        );

        checked_completion(&self.model_name, content)
    }
}

/// A blank completion carries nothing any stage can use.
fn checked_completion(provider: &str, content: String) -> Result<CompletionResponse, LlmError> {
    if content.trim().is_empty() {
        return Err(LlmError::InvalidResponse {
            provider: provider.to_string(),
            reason: "empty completion".to_string(),
        });
    }
    Ok(CompletionResponse { content })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_completion_is_invalid() {
        let err = checked_completion("stub", " \n ".to_string()).unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse { ref provider, .. } if provider == "stub"));
    }

    #[test]
    fn non_blank_completion_passes_through() {
        let resp = checked_completion("stub", "{\"summary\": \"ok\"}".to_string()).unwrap();
        assert_eq!(resp.content, "{\"summary\": \"ok\"}");
    }
}
