use crate::gemini::client::ApiError;

/// 判定一次上游失败是否应该换下一个 key 重试。
///
/// 可重试：429 / 5xx 可用性信号，以及消息中出现限流/配额词汇的情况。
/// 传输错误与 JSON 解析错误不可重试（不是凭证可用性问题）。
pub fn should_retry_with_next_key(err: &ApiError) -> bool {
    match err {
        ApiError::Http { status, message } => {
            if matches!(*status, 429 | 500 | 502 | 503 | 504) {
                return true;
            }
            let msg = message.to_lowercase();
            msg.contains("rate limit") || msg.contains("quota") || msg.contains("exhausted")
        }
        _ => false,
    }
}
