//! 成本估算：按 OpenAI 计价折算"省了多少钱"，只做观测与日志输出。
//!
//! 估算结果不参与任何路由或重试决策。

use std::sync::Mutex;

/// OpenAI 计价（美元 / 每百万 token）。
pub const INPUT_PRICE_PER_MILLION: f64 = 0.50;
pub const OUTPUT_PRICE_PER_MILLION: f64 = 1.50;
/// 词数到 token 数的近似比例。
pub const TOKENS_PER_WORD: f64 = 1.3;

#[derive(Debug, Default)]
pub struct CostEstimator {
    total_saved: Mutex<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct CostMetrics {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub saved: f64,
    pub total_saved: f64,
}

impl CostEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次请求/响应的估算成本，返回本次与累计数字。
    pub fn record(&self, input_text: &str, output_text: &str) -> CostMetrics {
        let input_tokens = estimate_tokens(input_text);
        let output_tokens = estimate_tokens(output_text);
        let saved = calculate_cost(input_tokens, output_tokens);

        let mut total = self
            .total_saved
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *total += saved;

        CostMetrics {
            input_tokens,
            output_tokens,
            saved,
            total_saved: *total,
        }
    }

    pub fn total_saved(&self) -> f64 {
        *self
            .total_saved
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// 轻量 token 估算：按字母/数字连续段计词，乘以 1.3 并向下取整。
/// 非空文本至少算 1 个 token。
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }

    let mut word_count = 0usize;
    let mut in_word = false;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            if !in_word {
                word_count += 1;
                in_word = true;
            }
        } else {
            in_word = false;
        }
    }

    let tokens = (word_count as f64 * TOKENS_PER_WORD) as usize;
    if tokens == 0 && word_count > 0 {
        return 1;
    }
    tokens
}

/// 按 OpenAI 计价计算等价成本（美元）。
pub fn calculate_cost(input_tokens: usize, output_tokens: usize) -> f64 {
    let input_cost = (input_tokens as f64 / 1_000_000.0) * INPUT_PRICE_PER_MILLION;
    let output_cost = (output_tokens as f64 / 1_000_000.0) * OUTPUT_PRICE_PER_MILLION;
    input_cost + output_cost
}

/// 拼接所有消息文本，用于输入侧 token 估算。
pub fn extract_input_text(messages: &[crate::gateway::types::Message]) -> String {
    let mut out = String::new();
    for msg in messages {
        out.push_str(&msg.content);
        out.push(' ');
    }
    out
}

/// 金额格式化：小额保留更多小数位。
pub fn format_money(amount: f64) -> String {
    if amount < 0.0001 {
        format!("${amount:.6}")
    } else if amount < 0.01 {
        format!("${amount:.4}")
    } else {
        format!("${amount:.2}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::types::Message;

    #[test]
    fn estimate_tokens_counts_words() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("hello"), 1);
        // 10 个词 × 1.3 = 13
        assert_eq!(estimate_tokens("a b c d e f g h i j"), 13);
        // 标点分词
        assert_eq!(estimate_tokens("hello, world!"), 2);
    }

    #[test]
    fn calculate_cost_uses_both_rates() {
        let cost = calculate_cost(1_000_000, 1_000_000);
        assert!((cost - 2.0).abs() < 1e-9);
        assert_eq!(calculate_cost(0, 0), 0.0);
    }

    #[test]
    fn record_accumulates() {
        let estimator = CostEstimator::new();
        let m1 = estimator.record("hello world", "hi there friend");
        assert!(m1.saved > 0.0);
        let m2 = estimator.record("hello world", "hi there friend");
        assert!((m2.total_saved - m1.total_saved - m1.saved).abs() < 1e-12);
        assert!((estimator.total_saved() - m2.total_saved).abs() < 1e-12);
    }

    #[test]
    fn extract_input_text_concatenates() {
        let messages = vec![
            Message {
                role: "user".to_string(),
                content: "hello".to_string(),
            },
            Message {
                role: "assistant".to_string(),
                content: "world".to_string(),
            },
        ];
        assert_eq!(extract_input_text(&messages), "hello world ");
    }

    #[test]
    fn format_money_precision_tiers() {
        assert_eq!(format_money(0.00001), "$0.000010");
        assert_eq!(format_money(0.005), "$0.0050");
        assert_eq!(format_money(1.5), "$1.50");
    }
}
