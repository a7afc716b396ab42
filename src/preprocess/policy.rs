//! 内联命令安全校验：任何歧义都拒绝
//!
//! 拒绝规则（按顺序检查）：
//! 1. 未配置白名单（除非显式开启 permissive）
//! 2. 含链式 / 替换类 shell 元字符
//! 3. 无法按 shell 规则分词
//! 4. 首个 token 为绝对路径或含 `..`
//! 5. 不匹配任何白名单条目（按 token 前缀匹配）

use std::fmt;

use crate::sandbox::has_parent_segment;

/// 禁止出现的元字符（不经过 shell 执行，但仍然一律拒绝）
const METACHARACTERS: &[&str] = &[";", "&&", "||", "|", "&", ">", "<", "`", "$(", "\n", "\r"];

/// 命中的拒绝规则
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyRule {
    NoAllowlist,
    Metacharacter(&'static str),
    Tokenize,
    UnsafePath,
    NotAllowlisted,
}

impl fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyRule::NoAllowlist => f.write_str("no-allowlist"),
            PolicyRule::Metacharacter(m) => write!(f, "metacharacter {:?}", m),
            PolicyRule::Tokenize => f.write_str("tokenize"),
            PolicyRule::UnsafePath => f.write_str("unsafe-path"),
            PolicyRule::NotAllowlisted => f.write_str("not-allowlisted"),
        }
    }
}

/// 一次拒绝
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRejection {
    pub command: String,
    pub rule: PolicyRule,
}

impl fmt::Display for PolicyRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.rule, self.command)
    }
}

/// 命令白名单策略
#[derive(Debug, Clone, Default)]
pub struct CommandPolicy {
    /// 已分词的白名单条目；None 或空表示未配置
    allowlist: Vec<Vec<String>>,
    permissive: bool,
}

impl CommandPolicy {
    /// `allowlist` 为 None 或空时默认全部拒绝
    pub fn new(allowlist: Option<&[String]>, permissive: bool) -> Self {
        let allowlist = allowlist
            .unwrap_or_default()
            .iter()
            .filter_map(|entry| normalize_entry(entry))
            .collect();
        Self {
            allowlist,
            permissive,
        }
    }

    pub fn deny_all() -> Self {
        Self::default()
    }

    pub fn has_allowlist(&self) -> bool {
        !self.allowlist.is_empty()
    }

    /// 校验通过时返回分词结果（program + args）
    pub fn check(&self, command: &str) -> Result<Vec<String>, PolicyRejection> {
        let reject = |rule: PolicyRule| {
            tracing::warn!(command = %command, rule = %rule, "inline command rejected");
            PolicyRejection {
                command: command.to_string(),
                rule,
            }
        };

        if !self.has_allowlist() {
            if !self.permissive {
                return Err(reject(PolicyRule::NoAllowlist));
            }
            tracing::warn!(command = %command, "no command allowlist configured, permissive mode is high risk");
        }

        if let Some(m) = METACHARACTERS.iter().find(|m| command.contains(**m)) {
            return Err(reject(PolicyRule::Metacharacter(*m)));
        }

        let tokens = match shlex::split(command) {
            Some(tokens) if !tokens.is_empty() => tokens,
            _ => return Err(reject(PolicyRule::Tokenize)),
        };

        let program = &tokens[0];
        if program.starts_with('/') || program.starts_with('\\') || has_parent_segment(program) {
            return Err(reject(PolicyRule::UnsafePath));
        }

        if self.has_allowlist()
            && !self
                .allowlist
                .iter()
                .any(|entry| entry.len() <= tokens.len() && tokens[..entry.len()] == entry[..])
        {
            return Err(reject(PolicyRule::NotAllowlisted));
        }

        Ok(tokens)
    }
}

/// 去掉 `:*` / `*` 通配后缀并分词
fn normalize_entry(entry: &str) -> Option<Vec<String>> {
    let trimmed = entry.trim();
    let trimmed = trimmed
        .strip_suffix(":*")
        .or_else(|| trimmed.strip_suffix('*'))
        .unwrap_or(trimmed)
        .trim();
    if trimmed.is_empty() {
        return None;
    }
    let tokens = shlex::split(trimmed)
        .unwrap_or_else(|| trimmed.split_whitespace().map(str::to_string).collect());
    (!tokens.is_empty()).then_some(tokens)
}
