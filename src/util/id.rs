use uuid::Uuid;

/// 生成 OpenAI 风格的 chat completion ID（chatcmpl- 前缀 + uuid 首段）。
pub fn chat_completion_id() -> String {
    let s = Uuid::new_v4().to_string();
    let prefix = s.split('-').next().unwrap_or(&s);
    let short = &prefix[..prefix.len().min(8)];
    format!("chatcmpl-{short}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_completion_id_has_prefix_and_is_unique() {
        let a = chat_completion_id();
        let b = chat_completion_id();
        assert!(a.starts_with("chatcmpl-"));
        assert_eq!(a.len(), "chatcmpl-".len() + 8);
        assert_ne!(a, b);
    }
}
