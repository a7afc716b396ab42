//! 工具执行器
//!
//! 持有 ToolRegistry 与超时，execute(tool_name, args) 在超时内调用工具，
//! 超时或失败时转为 EngineError（ToolTimeout / ToolExecutionFailed / HallucinatedTool）；每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::EngineError;
use crate::tools::{ToolDescriptor, ToolRegistry};

/// 工具执行器：对每次调用施加超时，并将结果映射为 EngineError
#[derive(Clone)]
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// 未注册的工具返回 HallucinatedTool，不会调用任何东西
    pub async fn execute(&self, tool_name: &str, args: serde_json::Value) -> Result<String, EngineError> {
        let Some(tool) = self.registry.get(tool_name) else {
            audit(tool_name, false, "unknown_tool", 0, &args_preview(&args));
            return Err(EngineError::HallucinatedTool(tool_name.to_string()));
        };

        let start = Instant::now();
        let preview = args_preview(&args);
        let result = timeout(self.timeout, tool.execute(args)).await;

        let (ok, outcome) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        audit(tool_name, ok, outcome, start.elapsed().as_millis() as u64, &preview);

        match result {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(e)) => Err(EngineError::ToolExecutionFailed(e)),
            Err(_) => Err(EngineError::ToolTimeout(tool_name.to_string())),
        }
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.registry.descriptors()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

fn audit(tool: &str, ok: bool, outcome: &str, duration_ms: u64, args_preview: &str) {
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": tool,
        "ok": ok,
        "outcome": outcome,
        "duration_ms": duration_ms,
        "args_preview": args_preview,
    });
    tracing::info!(audit = %audit, "tool");
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{EchoTool, Tool};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".into())
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(Slow);
        ToolExecutor::new(registry, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_execute_ok() {
        let out = executor().execute("echo", json!({"text": "hi"})).await.unwrap();
        assert_eq!(out, "hi");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_hallucinated() {
        let err = executor().execute("rm", json!({})).await.unwrap_err();
        assert!(matches!(err, EngineError::HallucinatedTool(name) if name == "rm"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let err = executor().execute("slow", json!({})).await.unwrap_err();
        assert!(matches!(err, EngineError::ToolTimeout(_)));
    }
}
