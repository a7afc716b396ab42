//! 生命周期事件与事件出口
//!
//! emit 是单向发布：不等待投递，不阻塞循环。慢消费者由具体实现决定丢弃策略。

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

use crate::core::TerminalState;

/// 运行生命周期事件（可序列化为 JSON 供流式传输）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    Started {
        run_id: String,
        task: String,
        depth: usize,
        parent_run_id: Option<String>,
    },
    /// 进入第 iteration 轮 THINKING
    IterationProgress {
        run_id: String,
        iteration: usize,
        max_iterations: usize,
    },
    ToolCallIssued {
        run_id: String,
        iteration: usize,
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    ToolResultReceived {
        run_id: String,
        iteration: usize,
        tool: String,
        success: bool,
        preview: String,
        duration_ms: u64,
    },
    Completed {
        run_id: String,
        iterations: usize,
    },
    /// EXHAUSTED / FAILED / 拒绝执行
    Failed {
        run_id: String,
        terminal: TerminalState,
        error: String,
        iterations: usize,
    },
}

impl EngineEvent {
    pub fn run_id(&self) -> &str {
        match self {
            EngineEvent::Started { run_id, .. }
            | EngineEvent::IterationProgress { run_id, .. }
            | EngineEvent::ToolCallIssued { run_id, .. }
            | EngineEvent::ToolResultReceived { run_id, .. }
            | EngineEvent::Completed { run_id, .. }
            | EngineEvent::Failed { run_id, .. } => run_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineEvent::Completed { .. } | EngineEvent::Failed { .. })
    }
}

/// 事件出口：fire-and-forget
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// 丢弃所有事件
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: EngineEvent) {}
}

/// broadcast 通道：消费者落后时丢弃最旧事件（订阅方收到 Lagged）
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<EngineEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: EngineEvent) {
        // 没有订阅者时 send 返回 Err，属于正常情况
        let _ = self.tx.send(event);
    }
}

/// 无界 mpsc 通道（流式运行使用；接收端关闭后静默丢弃）
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

/// 同时发往多个出口
#[derive(Clone, Default)]
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutEventSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }
}

impl EventSink for FanoutEventSink {
    fn emit(&self, event: EngineEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}
