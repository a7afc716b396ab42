//! 变量替换：`${NAME}` 占位符 → 运行时值
//!
//! 内置变量：ARGUMENTS、SESSION_ID、WORKING_DIR、ARG_1..ARG_n（按 shell 规则分词）。
//! 优先级：内置 > 调用方自定义 > 会话存储。未知占位符原样保留并记入警告，不会中断处理。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::{Captures, Regex};

/// 未出现 `${ARGUMENTS}` 时追加到文末的参数块前缀
pub const ARGUMENTS_BLOCK_PREFIX: &str = "ARGUMENTS: ";

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap())
}

/// 一次替换可用的全部取值
#[derive(Debug, Clone, Default)]
pub struct VariableValues {
    pub arguments: String,
    pub session_id: Option<String>,
    pub working_dir: Option<PathBuf>,
    /// 调用方提供的自定义变量
    pub custom: HashMap<String, String>,
    /// 会话存储中的变量
    pub session: HashMap<String, String>,
    positional: Vec<String>,
}

impl VariableValues {
    pub fn new(arguments: impl Into<String>) -> Self {
        let arguments = arguments.into();
        let positional = split_arguments(&arguments);
        Self {
            arguments,
            positional,
            ..Default::default()
        }
    }

    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_custom(mut self, values: HashMap<String, String>) -> Self {
        self.custom.extend(values);
        self
    }

    pub fn with_session_values(mut self, values: HashMap<String, String>) -> Self {
        self.session.extend(values);
        self
    }

    pub fn positional(&self) -> &[String] {
        &self.positional
    }

    /// 按优先级查找变量值
    pub fn resolve(&self, name: &str) -> Option<String> {
        match name {
            "ARGUMENTS" => return Some(self.arguments.clone()),
            "SESSION_ID" => {
                if let Some(id) = &self.session_id {
                    return Some(id.clone());
                }
            }
            "WORKING_DIR" => {
                if let Some(dir) = &self.working_dir {
                    return Some(dir.display().to_string());
                }
            }
            _ => {}
        }
        if let Some(index) = name.strip_prefix("ARG_").and_then(|n| n.parse::<usize>().ok()) {
            if index >= 1 {
                if let Some(value) = self.positional.get(index - 1) {
                    return Some(value.clone());
                }
            }
        }
        self.custom
            .get(name)
            .or_else(|| self.session.get(name))
            .cloned()
    }
}

/// shell 规则分词；引号不配对时退化为空白分割
fn split_arguments(arguments: &str) -> Vec<String> {
    shlex::split(arguments)
        .unwrap_or_else(|| arguments.split_whitespace().map(str::to_string).collect())
}

/// 替换结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub text: String,
    /// 未识别的占位符（去重，按出现顺序）
    pub warnings: Vec<String>,
}

/// 变量替换器（无状态）
#[derive(Debug, Default, Clone, Copy)]
pub struct VariableSubstitutor;

impl VariableSubstitutor {
    pub fn new() -> Self {
        Self
    }

    /// 单遍替换：替换进来的值不会被再次扫描
    pub fn substitute(&self, text: &str, values: &VariableValues) -> Substitution {
        let mut unknown: Vec<String> = Vec::new();
        let mut saw_arguments = false;

        let replaced = placeholder_re().replace_all(text, |caps: &Captures| {
            let name = &caps[1];
            if name == "ARGUMENTS" {
                saw_arguments = true;
            }
            match values.resolve(name) {
                Some(value) => value,
                None => {
                    if !unknown.iter().any(|u| u == name) {
                        unknown.push(name.to_string());
                    }
                    caps[0].to_string()
                }
            }
        });
        let mut text = replaced.into_owned();

        // 参数不能被静默丢弃；只有完全相同的参数块已存在时才不再追加
        let args = values.arguments.trim();
        let block = format!("{ARGUMENTS_BLOCK_PREFIX}{args}");
        if !saw_arguments && !args.is_empty() && !text.contains(&block) {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push('\n');
            text.push_str(ARGUMENTS_BLOCK_PREFIX);
            text.push_str(args);
        }

        let warnings: Vec<String> = unknown
            .into_iter()
            .map(|name| format!("unknown variable ${{{name}}} left unchanged"))
            .collect();
        for w in &warnings {
            tracing::warn!(warning = %w, "variable substitution");
        }
        Substitution { text, warnings }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builtins_replaced() {
        let values = VariableValues::new("src/main.rs --fast")
            .with_session_id("s-1")
            .with_working_dir("/work");
        let out = VariableSubstitutor.substitute(
            "Review ${ARGUMENTS} in ${WORKING_DIR} (session ${SESSION_ID})",
            &values,
        );
        assert_eq!(out.text, "Review src/main.rs --fast in /work (session s-1)");
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_positional_arguments() {
        let values = VariableValues::new(r#"alpha "beta gamma""#);
        let out = VariableSubstitutor.substitute("${ARG_1}/${ARG_2}", &values);
        assert_eq!(out.text, "alpha/beta gamma");
    }

    #[test]
    fn test_unknown_placeholder_kept_and_warned() {
        let out = VariableSubstitutor.substitute("x ${NOPE} ${NOPE} ${ARG_9}", &VariableValues::new(""));
        assert_eq!(out.text, "x ${NOPE} ${NOPE} ${ARG_9}");
        assert_eq!(out.warnings.len(), 2);
        assert!(out.warnings[0].contains("${NOPE}"));
    }

    #[test]
    fn test_arguments_appended_when_placeholder_absent() {
        let out = VariableSubstitutor.substitute("Do the thing.", &VariableValues::new("fix bug 42"));
        assert_eq!(out.text, "Do the thing.\n\nARGUMENTS: fix bug 42");
    }

    #[test]
    fn test_arguments_appended_when_text_mentions_them() {
        let out = VariableSubstitutor.substitute("Run the test suite and report.", &VariableValues::new("test"));
        assert_eq!(out.text, "Run the test suite and report.\n\nARGUMENTS: test");

        let again = VariableSubstitutor.substitute(&out.text, &VariableValues::new("test"));
        assert_eq!(again.text, out.text);
        assert_eq!(again.text.matches("ARGUMENTS: ").count(), 1);
    }

    #[test]
    fn test_no_append_without_arguments() {
        let out = VariableSubstitutor.substitute("Do the thing.", &VariableValues::new("  "));
        assert_eq!(out.text, "Do the thing.");
    }

    #[test]
    fn test_substitution_is_idempotent() {
        let values = VariableValues::new("fix bug 42").with_session_id("abc");
        let sub = VariableSubstitutor;
        for input in ["Task: ${SESSION_ID} ${X}", "No placeholder here.", "Run the fix bug 42 suite."] {
            let once = sub.substitute(input, &values);
            let twice = sub.substitute(&once.text, &values);
            assert_eq!(once.text, twice.text);
        }
    }

    #[test]
    fn test_precedence_builtin_custom_session() {
        let custom = HashMap::from([
            ("TEAM".to_string(), "custom".to_string()),
            ("SESSION_ID".to_string(), "spoofed".to_string()),
        ]);
        let session = HashMap::from([
            ("TEAM".to_string(), "session".to_string()),
            ("REGION".to_string(), "eu".to_string()),
        ]);
        let values = VariableValues::new("")
            .with_session_id("real")
            .with_custom(custom)
            .with_session_values(session);
        let out = VariableSubstitutor.substitute("${SESSION_ID} ${TEAM} ${REGION}", &values);
        assert_eq!(out.text, "real custom eu");
    }

    #[test]
    fn test_values_are_not_rescanned() {
        let custom = HashMap::from([("A".to_string(), "${B}".to_string())]);
        let values = VariableValues::new("").with_custom(custom);
        let out = VariableSubstitutor.substitute("${A}", &values);
        assert_eq!(out.text, "${B}");
        assert!(out.warnings.is_empty());
    }
}
