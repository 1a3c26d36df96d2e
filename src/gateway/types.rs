use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// 兼容字段：流式响应不在支持范围内，解析后按非流式处理。
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(rename = "top_p", default)]
    pub top_p: Option<f64>,
    #[serde(rename = "max_tokens", default)]
    pub max_tokens: Option<i32>,
    #[serde(default)]
    pub stop: Vec<String>,
}

impl ChatRequest {
    /// 结构校验：messages 非空，角色限定 system/user/assistant。
    pub fn validate(&self) -> Result<(), String> {
        if self.messages.is_empty() {
            return Err("messages 不能为空".to_string());
        }
        for msg in &self.messages {
            match msg.role.as_str() {
                "system" | "user" | "assistant" => {}
                other => return Err(format!("不支持的消息角色: {other}")),
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: i32,
    pub message: Message,
    pub finish_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub total_tokens: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelsResponse {
    pub object: String,
    pub data: Vec<ModelItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelItem {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_keys: usize,
    pub dead_keys: usize,
    pub total_keys: usize,
}
