//! 上下文引用扫描：渐进式披露
//!
//! 只建立目录（名称、描述、大小估计），不加载内容；推理方通过 `load_reference` 按需读取。
//! 识别的写法：
//! - `see X for details`
//! - `- X: description`
//! - `**X**`
//! - `[label](relative/path)`

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use walkdir::WalkDir;

use crate::sandbox::{has_parent_segment, resolve_within};

/// 按文件名兜底搜索的最大目录深度
const SEARCH_DEPTH: usize = 3;

struct Patterns {
    see_for: Regex,
    list_item: Regex,
    bold: Regex,
    link: Regex,
}

fn patterns() -> &'static Patterns {
    static P: OnceLock<Patterns> = OnceLock::new();
    P.get_or_init(|| Patterns {
        see_for: Regex::new(r"(?i)\bsee\s+`?([\w./-]+\.[A-Za-z0-9]+)`?\s+for\s+([^.\n]+)").unwrap(),
        list_item: Regex::new(r"(?m)^[ \t]*[-*][ \t]+(?:\*\*|`)?([\w./-]+\.[A-Za-z0-9]+)(?:\*\*|`)?[ \t]*:[ \t]*(.+?)[ \t]*$").unwrap(),
        bold: Regex::new(r"\*\*([\w./-]+\.[A-Za-z0-9]+)\*\*").unwrap(),
        link: Regex::new(r"\[([^\]\n]+)\]\(([^)\s]+)\)").unwrap(),
    })
}

/// 目录中的一项
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceEntry {
    /// 指令文本中出现的名称
    pub name: String,
    pub description: Option<String>,
    /// 工作目录内的真实路径（已 canonicalize）
    pub path: PathBuf,
    /// 字节数
    pub size_bytes: u64,
}

impl ReferenceEntry {
    /// 粗略 token 估计：4 字节 ≈ 1 token
    pub fn estimated_tokens(&self) -> u64 {
        self.size_bytes.div_ceil(4)
    }
}

/// 引用目录（去重，按首次出现顺序）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReferenceCatalog {
    entries: Vec<ReferenceEntry>,
}

impl ReferenceCatalog {
    pub fn entries(&self) -> &[ReferenceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按名称或文件名查找
    pub fn get(&self, name: &str) -> Option<&ReferenceEntry> {
        let name = name.trim().trim_start_matches("./");
        self.entries.iter().find(|e| e.name == name).or_else(|| {
            self.entries.iter().find(|e| {
                e.path
                    .file_name()
                    .map(|f| f.to_string_lossy() == name)
                    .unwrap_or(false)
            })
        })
    }

    /// 供提示词使用的简短列表
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| {
                let desc = e.description.as_deref().unwrap_or("no description");
                format!("- {} (~{} tokens): {}", e.name, e.estimated_tokens(), desc)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn push(&mut self, entry: ReferenceEntry) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.path == entry.path) {
            if existing.description.is_none() {
                existing.description = entry.description;
            }
            return;
        }
        self.entries.push(entry);
    }
}

/// 引用扫描器
#[derive(Debug, Default, Clone, Copy)]
pub struct ContextReferenceScanner;

impl ContextReferenceScanner {
    pub fn new() -> Self {
        Self
    }

    /// 扫描文本并解析到 working_dir 下；不存在的文件静默丢弃
    pub fn scan(&self, text: &str, working_dir: &Path) -> ReferenceCatalog {
        let mut candidates: Vec<(usize, String, Option<String>)> = Vec::new();
        let p = patterns();

        for caps in p.see_for.captures_iter(text) {
            let pos = caps.get(0).map(|m| m.start()).unwrap_or(0);
            candidates.push((pos, caps[1].to_string(), clean_description(&caps[2])));
        }
        for caps in p.list_item.captures_iter(text) {
            let pos = caps.get(0).map(|m| m.start()).unwrap_or(0);
            candidates.push((pos, caps[1].to_string(), clean_description(&caps[2])));
        }
        for caps in p.bold.captures_iter(text) {
            let pos = caps.get(0).map(|m| m.start()).unwrap_or(0);
            candidates.push((pos, caps[1].to_string(), None));
        }
        for caps in p.link.captures_iter(text) {
            let target = &caps[2];
            if target.contains("://") || target.starts_with('#') || target.starts_with("mailto:") {
                continue;
            }
            let target = target.split('#').next().unwrap_or(target);
            let pos = caps.get(0).map(|m| m.start()).unwrap_or(0);
            candidates.push((pos, target.to_string(), clean_description(&caps[1])));
        }
        candidates.sort_by_key(|(pos, _, _)| *pos);

        let mut catalog = ReferenceCatalog::default();
        for (_, name, description) in candidates {
            let name = name.trim_start_matches("./").to_string();
            match locate(working_dir, &name) {
                Some(path) => {
                    let size_bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                    catalog.push(ReferenceEntry {
                        name,
                        description,
                        path,
                        size_bytes,
                    });
                }
                None => tracing::debug!(reference = %name, "referenced file not found, skipped"),
            }
        }
        catalog
    }
}

fn clean_description(raw: &str) -> Option<String> {
    let d = raw.trim().trim_end_matches(['.', ',', ';']).trim();
    (!d.is_empty()).then(|| d.to_string())
}

/// 先按相对路径直接解析，再按文件名在有限深度内搜索；结果必须是工作目录内的普通文件
fn locate(working_dir: &Path, name: &str) -> Option<PathBuf> {
    if Path::new(name).is_absolute() || has_parent_segment(name) {
        return None;
    }
    if let Ok(path) = resolve_within(working_dir, name) {
        if path.is_file() {
            return Some(path);
        }
    }
    let file_name = Path::new(name).file_name()?;
    let root = working_dir.canonicalize().ok()?;
    WalkDir::new(&root)
        .max_depth(SEARCH_DEPTH)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name() == file_name)
        .find_map(|e| {
            let rel = e.path().strip_prefix(&root).ok()?.to_string_lossy().to_string();
            resolve_within(&root, &rel).ok()
        })
}
