//! 提示词组装：纯函数，相同输入得到相同输出

use crate::preprocess::ReferenceCatalog;
use crate::tools::{decision_schema_json, ToolDescriptor};

/// 组装所需的全部输入
#[derive(Debug, Clone, Copy)]
pub struct PromptInput<'a> {
    pub task: &'a str,
    /// 祖先任务链（根任务在前）；根运行为空
    pub lineage: &'a [String],
    pub instructions: &'a str,
    pub references: &'a ReferenceCatalog,
    pub tools: &'a [ToolDescriptor],
    /// 当前迭代（从 1 开始）
    pub iteration: usize,
    pub max_iterations: usize,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PromptAssembler;

impl PromptAssembler {
    pub fn new() -> Self {
        Self
    }

    pub fn assemble(&self, input: &PromptInput<'_>) -> String {
        let mut out = String::new();
        out.push_str(&format!("# Task: {}\n", input.task));
        if !input.lineage.is_empty() {
            out.push_str(&format!(
                "Delegated sub-task of: {}\n",
                input.lineage.join(" > ")
            ));
        }

        out.push_str("\n## Instructions\n");
        out.push_str(input.instructions.trim_end());
        out.push('\n');

        if !input.references.is_empty() {
            out.push_str("\n## Available references\n");
            out.push_str("Not loaded yet. Request one with the load_reference tool only when needed.\n");
            out.push_str(&input.references.render());
            out.push('\n');
        }

        out.push_str("\n## Tools\n");
        let mut tools: Vec<&ToolDescriptor> = input.tools.iter().collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        if tools.is_empty() {
            out.push_str("(none)\n");
        }
        for tool in tools {
            let line = tool.description.lines().next().unwrap_or("").trim();
            out.push_str(&format!("- {}: {}\n", tool.name, line));
            if let Some(props) = tool.parameters.get("properties").and_then(|p| p.as_object()) {
                if !props.is_empty() {
                    let names: Vec<&str> = props.keys().map(String::as_str).collect();
                    out.push_str(&format!("  args: {}\n", names.join(", ")));
                }
            }
        }

        out.push_str("\n## Response format\n");
        out.push_str("Reply with exactly one JSON object, either a tool call:\n");
        out.push_str("{\"thought\": \"...\", \"tool\": \"<tool name>\", \"args\": {...}}\n");
        out.push_str("or a final answer:\n");
        out.push_str("{\"thought\": \"...\", \"final_answer\": \"...\", \"done\": true}\n");
        out.push_str("Schema:\n");
        out.push_str(&decision_schema_json());
        out.push('\n');

        out.push_str(&format!(
            "\n## Progress\nIteration {}/{}\n",
            input.iteration, input.max_iterations
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tools() -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new("ls", "List a directory.", json!({"type": "object", "properties": {"path": {}}})),
            ToolDescriptor::new("echo", "Echo text.\nSecond line ignored.", json!({})),
        ]
    }

    #[test]
    fn test_assemble_is_deterministic_and_sorted() {
        let catalog = ReferenceCatalog::default();
        let tools = tools();
        let input = PromptInput {
            task: "review",
            lineage: &[],
            instructions: "Do it.",
            references: &catalog,
            tools: &tools,
            iteration: 2,
            max_iterations: 15,
        };
        let a = PromptAssembler.assemble(&input);
        let b = PromptAssembler.assemble(&input);
        assert_eq!(a, b);
        let echo = a.find("- echo: Echo text.").unwrap();
        let ls = a.find("- ls: List a directory.").unwrap();
        assert!(echo < ls);
        assert!(!a.contains("Second line ignored"));
        assert!(a.contains("  args: path"));
        assert!(a.contains("Iteration 2/15"));
        assert!(!a.contains("## Available references"));
    }

    #[test]
    fn test_lineage_rendered() {
        let catalog = ReferenceCatalog::default();
        let lineage = vec!["root".to_string(), "mid".to_string()];
        let input = PromptInput {
            task: "leaf",
            lineage: &lineage,
            instructions: "",
            references: &catalog,
            tools: &[],
            iteration: 1,
            max_iterations: 3,
        };
        let out = PromptAssembler.assemble(&input);
        assert!(out.contains("Delegated sub-task of: root > mid"));
        assert!(out.contains("(none)"));
    }
}
