// 模型适配层：OpenAI 兼容的 Chat Completions 接口。
use crate::config::LlmConfig;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Value) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelReply {
    pub content: String,
    /// OpenAI 格式的 tool_calls 数组，未请求工具时为 None。
    pub tool_calls: Option<Value>,
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<ModelReply>;
}

pub struct LlmClient {
    http: Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or("https://api.openai.com/v1");
        format!("{}/chat/completions", base.trim_end_matches('/'))
    }

    fn build_payload(&self, messages: &[ChatMessage], tools: &[Value]) -> Value {
        let mut payload = json!({
            "model": self.config.model.as_deref().unwrap_or("gpt-4o-mini"),
            "messages": messages,
        });
        if let Some(temperature) = self.config.temperature {
            payload["temperature"] = json!(temperature);
        }
        if !tools.is_empty() {
            payload["tools"] = Value::Array(tools.to_vec());
            payload["tool_choice"] = json!("auto");
        }
        payload
    }
}

#[async_trait]
impl ModelClient for LlmClient {
    async fn complete(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<ModelReply> {
        if !self.config.is_configured() {
            return Err(anyhow!("模型未配置 api_key"));
        }
        let payload = self.build_payload(messages, tools);
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(self.config.api_key.as_deref().unwrap_or_default())
            .timeout(Duration::from_secs(self.config.timeout_seconds()))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(anyhow!(
                "模型接口返回 {}: {}",
                status.as_u16(),
                truncate_text(&body, 300)
            ));
        }

        let value: Value = serde_json::from_str(&body)
            .map_err(|err| anyhow!("模型响应不是合法 JSON: {err}"))?;
        let message = value
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .ok_or_else(|| anyhow!("模型响应缺少 choices[0].message"))?;

        let content = message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let tool_calls = message
            .get("tool_calls")
            .filter(|calls| calls.as_array().map(|items| !items.is_empty()).unwrap_or(false))
            .cloned();

        Ok(ModelReply {
            content,
            tool_calls,
        })
    }
}

fn truncate_text(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut result: String = text.chars().take(limit).collect();
    result.push_str("...");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_includes_tools_only_when_present() {
        let client = LlmClient::new(LlmConfig {
            model: Some("test-model".to_string()),
            temperature: Some(0.2),
            ..LlmConfig::default()
        });
        let messages = vec![ChatMessage::user("hi")];

        let bare = client.build_payload(&messages, &[]);
        assert!(bare.get("tools").is_none());
        assert_eq!(bare["model"], "test-model");

        let tools = vec![json!({"type": "function", "function": {"name": "add_task"}})];
        let with_tools = client.build_payload(&messages, &tools);
        assert_eq!(with_tools["tool_choice"], "auto");
        assert_eq!(with_tools["tools"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn tool_message_serializes_call_id() {
        let message = ChatMessage::tool("call_1", "{\"ok\":true}");
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["tool_call_id"], "call_1");
        assert!(value.get("tool_calls").is_none());
    }
}
