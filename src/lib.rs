//! Bee Engine - 自主任务执行引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、预算与委派树、运行状态、编排器入口
//! - **instructions**: 指令来源（任务目录 / 内存表）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）与重试
//! - **memory**: 对话历史与会话变量存储
//! - **observability**: tracing 初始化
//! - **preprocess**: 变量替换、引用扫描、内联命令注入
//! - **react**: 推理决策、提示词组装、事件出口、ReAct 主循环
//! - **sandbox**: 命令 / 脚本的隔离执行（none / process / container）
//! - **tools**: 工具箱（cat、ls、echo、run_script）与执行器

pub mod config;
pub mod core;
pub mod instructions;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod preprocess;
pub mod react;
pub mod sandbox;
pub mod tools;

pub use crate::core::{
    EngineError, ExecutionConfig, ExecutionOrchestrator, ExecutionResult, OrchestratorBuilder,
    RunRequest, StreamItem, TerminalState, ValidationError,
};
pub use crate::react::{EngineEvent, EventSink};
