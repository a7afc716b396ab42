//! 工具箱：cat、ls、echo、run_script 与执行器

pub mod echo;
pub mod executor;
pub mod filesystem;
pub mod registry;
pub mod run_script;
pub mod schema;

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::sandbox::{ResourceLimits, SandboxExecutor};

pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use filesystem::{CatTool, LsTool, SafeFs};
pub use registry::{Tool, ToolDescriptor, ToolRegistry};
pub use run_script::RunScriptTool;
pub use schema::decision_schema_json;

/// 单次运行的标准工具集：文件工具绑定工作目录，run_script 在指令目录下走沙箱并响应取消
pub fn standard_registry(
    working_dir: &Path,
    source_dir: &Path,
    sandbox: Arc<dyn SandboxExecutor>,
    limits: ResourceLimits,
    cancel: CancellationToken,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool);
    registry.register(CatTool::new(working_dir, limits.max_output_chars));
    registry.register(LsTool::new(working_dir));
    registry.register(RunScriptTool::new(sandbox, source_dir, limits, cancel));
    registry
}
