//! 推理提供方：给定指令负载与对话历史，返回一次 ReasoningDecision

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::ProviderError;
use crate::llm::{LlmClient, LlmError};
use crate::memory::Message;
use crate::react::decision::{parse_decision, ReasoningDecision};

/// 推理提供方 trait
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    async fn complete(
        &self,
        payload: &str,
        history: &[Message],
        model_hint: Option<&str>,
    ) -> Result<ReasoningDecision, ProviderError>;
}

/// 基于 LlmClient 的提供方：payload 作为 system 消息，回复按 JSON 决策格式解析
pub struct LlmReasoningProvider {
    llm: Arc<dyn LlmClient>,
}

impl LlmReasoningProvider {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }
}

impl From<LlmError> for ProviderError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Api(msg) => ProviderError::Rejected(msg),
            other => ProviderError::Unavailable(other.to_string()),
        }
    }
}

#[async_trait]
impl ReasoningProvider for LlmReasoningProvider {
    async fn complete(
        &self,
        payload: &str,
        history: &[Message],
        model_hint: Option<&str>,
    ) -> Result<ReasoningDecision, ProviderError> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(Message::system(payload));
        messages.extend_from_slice(history);
        let reply = self.llm.complete(&messages, model_hint).await?;
        Ok(parse_decision(&reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    #[tokio::test]
    async fn test_reply_is_parsed() {
        let llm = Arc::new(MockLlmClient::scripted([r#"{"final_answer":"done"}"#]));
        let provider = LlmReasoningProvider::new(llm);
        let d = provider.complete("payload", &[], None).await.unwrap();
        assert_eq!(d, ReasoningDecision::final_answer("done"));
    }

    #[tokio::test]
    async fn test_errors_mapped() {
        let llm = Arc::new(MockLlmClient::with_results([Err(LlmError::Timeout)]));
        let provider = LlmReasoningProvider::new(llm);
        let err = provider.complete("p", &[], None).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }
}
