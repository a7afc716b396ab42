//! 路径约束：执行路径必须落在指令来源目录内
//!
//! 派发前校验，防止通过构造的路径参数（../、绝对路径、符号链接）逃逸。

use std::path::{Component, Path, PathBuf};

use crate::sandbox::SandboxError;

/// 解析后的可执行目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedProgram {
    /// 裸命令名，由 PATH 查找
    Bare(String),
    /// 指令目录内的脚本
    Script {
        host_path: PathBuf,
        relative: PathBuf,
    },
}

/// 将相对路径解析到 root 下并校验不越界（root 与目标都经 canonicalize）
pub fn resolve_within(root: &Path, relative: &str) -> Result<PathBuf, SandboxError> {
    let rel = relative.trim_start_matches("./");
    if Path::new(rel).is_absolute() {
        return Err(SandboxError::PathEscape(relative.to_string()));
    }
    let root_canon = root.canonicalize()?;
    let full = root_canon.join(rel);
    let canonical = full
        .canonicalize()
        .map_err(|_| SandboxError::NotFound(relative.to_string()))?;
    if canonical.starts_with(&root_canon) {
        Ok(canonical)
    } else {
        Err(SandboxError::PathEscape(relative.to_string()))
    }
}

/// 是否含有 `..` 路径段
pub fn has_parent_segment(path: &str) -> bool {
    Path::new(path)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
}

/// 含路径分隔符的 program 视为脚本路径并约束在 source_dir 内；否则视为裸命令名
pub fn resolve_program(program: &str, source_dir: &Path) -> Result<ResolvedProgram, SandboxError> {
    if program.is_empty() {
        return Err(SandboxError::NotFound("(empty program)".to_string()));
    }
    if !program.contains('/') && !program.contains(std::path::MAIN_SEPARATOR) {
        return Ok(ResolvedProgram::Bare(program.to_string()));
    }
    if Path::new(program).is_absolute() || has_parent_segment(program) {
        return Err(SandboxError::PathEscape(program.to_string()));
    }
    let host_path = resolve_within(source_dir, program)?;
    let root_canon = source_dir.canonicalize()?;
    let relative = host_path
        .strip_prefix(&root_canon)
        .map(Path::to_path_buf)
        .map_err(|_| SandboxError::PathEscape(program.to_string()))?;
    Ok(ResolvedProgram::Script {
        host_path,
        relative,
    })
}
