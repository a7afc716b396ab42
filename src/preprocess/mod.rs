//! 指令预处理管线：变量替换 → 引用扫描 → 内联命令注入
//!
//! 每次运行只执行一次（不是每轮迭代），产物交给 PromptAssembler。

pub mod injector;
pub mod policy;
pub mod references;
pub mod variables;

use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::core::EngineError;

pub use injector::{CommandInjectionResult, CommandInjector, InjectionOutcome};
pub use policy::{CommandPolicy, PolicyRejection, PolicyRule};
pub use references::{ContextReferenceScanner, ReferenceCatalog, ReferenceEntry};
pub use variables::{Substitution, VariableSubstitutor, VariableValues};

/// 预处理产物
#[derive(Debug, Clone, Default)]
pub struct ProcessedInstructions {
    pub text: String,
    /// 未识别变量等非致命问题
    pub warnings: Vec<String>,
    pub references: ReferenceCatalog,
    pub injections: Vec<CommandInjectionResult>,
}

impl ProcessedInstructions {
    /// 实际执行过的内联命令数（不含被拒绝的）
    pub fn injected_count(&self) -> usize {
        self.injections.iter().filter(|r| !r.is_rejected()).count()
    }
}

/// 预处理管线
pub struct Preprocessor {
    substitutor: VariableSubstitutor,
    scanner: ContextReferenceScanner,
    injector: CommandInjector,
}

impl Preprocessor {
    pub fn new(injector: CommandInjector) -> Self {
        Self {
            substitutor: VariableSubstitutor::new(),
            scanner: ContextReferenceScanner::new(),
            injector,
        }
    }

    /// 引用相对 `working_dir` 解析；内联命令以 `source_dir`（指令所在目录）为来源目录执行
    pub async fn process(
        &self,
        raw: &str,
        values: &VariableValues,
        working_dir: &Path,
        source_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<ProcessedInstructions, EngineError> {
        let Substitution { text, warnings } = self.substitutor.substitute(raw, values);
        let references = self.scanner.scan(&text, working_dir);
        let InjectionOutcome { text, results } =
            self.injector.inject(&text, source_dir, cancel).await?;

        tracing::debug!(
            warnings = warnings.len(),
            references = references.len(),
            commands = results.len(),
            "instructions preprocessed"
        );
        Ok(ProcessedInstructions {
            text,
            warnings,
            references,
            injections: results,
        })
    }
}
