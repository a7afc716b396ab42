//! Mock LLM 客户端（用于测试与离线演示，无需 API）
//!
//! - `scripted`：按顺序返回预设回复，用完后重复最后一条
//! - 默认：先回显一次 echo 工具调用，看到工具观察后给出最终答案

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};

/// Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    last: Mutex<Option<Result<String, LlmError>>>,
    calls: AtomicUsize,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_results(replies.into_iter().map(|r| Ok(r.into())))
    }

    pub fn with_results(results: impl IntoIterator<Item = Result<String, LlmError>>) -> Self {
        Self {
            script: Mutex::new(results.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn echo_reply(messages: &[Message]) -> String {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        if let Some(observation) = last_user.strip_prefix("Observation") {
            let body = observation.split_once('\n').map(|(_, b)| b).unwrap_or("");
            return serde_json::json!({
                "thought": "The tool result answers the task.",
                "final_answer": body.trim(),
            })
            .to_string();
        }
        let preview: String = last_user.chars().take(200).collect();
        serde_json::json!({
            "thought": "Echo the request back.",
            "tool": "echo",
            "args": {"text": format!("Echo from Mock: {preview}")},
        })
        .to_string()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message], _model_hint: Option<&str>) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .map_err(|_| LlmError::Api("mock script poisoned".into()))?
            .pop_front();
        let mut last = self
            .last
            .lock()
            .map_err(|_| LlmError::Api("mock script poisoned".into()))?;
        match next {
            Some(reply) => {
                *last = Some(reply.clone());
                reply
            }
            None => match last.as_ref() {
                Some(reply) => reply.clone(),
                None => Ok(Self::echo_reply(messages)),
            },
        }
    }
}
