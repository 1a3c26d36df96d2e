//! OpenAI 兼容结构与 Gemini wire 结构之间的转换。

use crate::gateway::types::{ChatCompletion, ChatRequest, Choice, Message, Usage};
use crate::gemini::types::{
    Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig, Part,
};
use crate::util::id;

/// OpenAI 模型名到 Gemini 模型名的映射；未知名称原样透传（视为 Gemini 模型）。
pub fn map_model_name(model: &str) -> &str {
    match model {
        "gpt-4" | "gpt-4-turbo" | "gemini-pro" => "gemini-1.5-pro",
        "gpt-4o" | "gpt-3.5-turbo" => "gemini-1.5-flash",
        "gpt-4o-mini" => "gemini-1.5-flash-8b",
        other => other,
    }
}

/// OpenAI 请求 -> Gemini 请求。
///
/// - system 消息保序拼接进 systemInstruction（Gemini 没有 system 角色）
/// - assistant 改写为 Gemini 的 model 角色
/// - 生成参数仅在客户端给出时写入
pub fn to_gemini_request(req: &ChatRequest) -> GenerateContentRequest {
    let mut contents = Vec::with_capacity(req.messages.len());
    let mut system_parts: Vec<&str> = Vec::new();

    for msg in &req.messages {
        match msg.role.as_str() {
            "system" => system_parts.push(&msg.content),
            "user" => contents.push(Content {
                role: "user".to_string(),
                parts: vec![Part {
                    text: msg.content.clone(),
                }],
            }),
            "assistant" => contents.push(Content {
                role: "model".to_string(),
                parts: vec![Part {
                    text: msg.content.clone(),
                }],
            }),
            // 角色在网关层已校验，这里不会走到。
            _ => {}
        }
    }

    let system_instruction = if system_parts.is_empty() {
        None
    } else {
        Some(Content {
            role: String::new(),
            parts: vec![Part {
                text: system_parts.join("\n"),
            }],
        })
    };

    GenerateContentRequest {
        contents,
        system_instruction,
        generation_config: GenerationConfig {
            temperature: req.temperature,
            top_p: req.top_p,
            max_output_tokens: req.max_tokens,
            stop_sequences: req.stop.clone(),
        },
    }
}

/// Gemini 响应 -> OpenAI chat completion。
///
/// 每个候选取第一个文本 part 作为 assistant 内容；id 与时间戳本地生成；
/// model 回显客户端传入的名字而非后端实际模型。
pub fn to_chat_completion(resp: &GenerateContentResponse, model: &str) -> ChatCompletion {
    let choices = resp
        .candidates
        .iter()
        .enumerate()
        .map(|(i, candidate)| {
            let content = candidate
                .content
                .parts
                .first()
                .map(|p| p.text.clone())
                .unwrap_or_default();
            Choice {
                index: i as i32,
                message: Message {
                    role: "assistant".to_string(),
                    content,
                },
                finish_reason: map_finish_reason(&candidate.finish_reason).to_string(),
            }
        })
        .collect();

    let usage = match &resp.usage_metadata {
        Some(u) => Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        },
        None => Usage {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
        },
    };

    ChatCompletion {
        id: id::chat_completion_id(),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: model.to_string(),
        choices,
        usage,
    }
}

/// Gemini finishReason -> OpenAI finish_reason。
pub fn map_finish_reason(reason: &str) -> &'static str {
    match reason {
        "STOP" => "stop",
        "MAX_TOKENS" => "length",
        "SAFETY" | "RECITATION" => "content_filter",
        _ => "stop",
    }
}
