//! DeepSeek 端点（OpenAI 兼容）
//!
//! - deepseek-chat：常规对话，响应快
//! - deepseek-reasoner：思考模式，适合复杂推理

use crate::llm::OpenAiClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
pub const DEEPSEEK_REASONER: &str = "deepseek-reasoner";

/// DEEPSEEK_API_KEY 优先，其次 OPENAI_API_KEY
pub fn deepseek_api_key() -> Option<String> {
    std::env::var("DEEPSEEK_API_KEY")
        .ok()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .filter(|k| !k.trim().is_empty())
}

pub fn is_deepseek_model(model: &str) -> bool {
    model.starts_with("deepseek-")
}

/// 显式参数 > DEEPSEEK_MODEL > deepseek-chat
pub fn resolve_deepseek_model(model: Option<&str>) -> String {
    model
        .filter(|m| !m.trim().is_empty())
        .map(String::from)
        .or_else(|| std::env::var("DEEPSEEK_MODEL").ok())
        .unwrap_or_else(|| DEEPSEEK_CHAT.to_string())
}

/// 创建 DeepSeek 客户端；base_url 为 None 时使用官方端点
pub fn create_deepseek_client(model: Option<&str>, base_url: Option<&str>) -> OpenAiClient {
    let model = resolve_deepseek_model(model);
    let api_key = deepseek_api_key();
    OpenAiClient::new(
        Some(base_url.unwrap_or(DEEPSEEK_BASE_URL)),
        &model,
        api_key.as_deref(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_detection() {
        assert!(is_deepseek_model(DEEPSEEK_REASONER));
        assert!(!is_deepseek_model("gpt-4o-mini"));
    }

    #[test]
    fn test_explicit_model_wins() {
        assert_eq!(resolve_deepseek_model(Some(DEEPSEEK_REASONER)), DEEPSEEK_REASONER);
        let client = create_deepseek_client(Some(DEEPSEEK_REASONER), None);
        assert_eq!(client.model(), DEEPSEEK_REASONER);
    }
}
