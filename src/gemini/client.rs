//! Gemini 上游客户端：单次 generateContent 调用 + 错误分类。
//!
//! 客户端本身无状态：凭证按调用传入，由重试层决定每次尝试用哪个 key。

use crate::config::Config;
use crate::gateway::types::{ChatCompletion, ChatRequest};
use crate::gemini::convert;
use crate::gemini::types::{ErrorResponse, GenerateContentResponse};
use crate::logging;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Gemini API 错误 {status}: {message}")]
    Http { status: u16, message: String },

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] sonic_rs::Error),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    log_level: logging::LogLevel,
}

impl GeminiClient {
    pub fn new(cfg: &Config) -> Result<Self, anyhow::Error> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90));

        if cfg.upstream_timeout_ms > 0 {
            builder = builder.timeout(Duration::from_millis(cfg.upstream_timeout_ms));
        }

        Ok(Self {
            http: builder.build()?,
            base_url: cfg.upstream_base_url.trim_end_matches('/').to_string(),
            log_level: cfg.log_level(),
        })
    }

    fn build_headers(&self) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        h
    }

    /// 执行一次 generateContent 调用。
    ///
    /// 凭证按上游约定放在 key 查询参数里，不会出现在日志或返回值中。
    /// 非 2xx 响应尽力解析错误信封；解析失败不掩盖 HTTP 状态码。
    pub async fn generate_content(
        &self,
        api_key: &str,
        req: &ChatRequest,
    ) -> Result<ChatCompletion, ApiError> {
        let model = convert::map_model_name(&req.model);
        let url = format!("{}/models/{model}:generateContent", self.base_url);
        let body = sonic_rs::to_vec(&convert::to_gemini_request(req))?;

        if self.log_level.backend_enabled() {
            logging::backend_request("POST", &url, &body);
        }

        let start = std::time::Instant::now();
        let resp = self
            .http
            .post(&url)
            .query(&[("key", api_key)])
            .headers(self.build_headers())
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        let bytes = resp.bytes().await?;
        if self.log_level.backend_enabled() {
            logging::backend_response(status.as_u16(), start.elapsed(), &bytes);
        }

        if !status.is_success() {
            return Err(extract_error_details(status.as_u16(), &bytes));
        }

        let gemini_resp = sonic_rs::from_slice::<GenerateContentResponse>(&bytes)?;
        Ok(convert::to_chat_completion(&gemini_resp, &req.model))
    }
}

/// 把上游错误响应转换为分类错误。信封解析失败时退回原始响应文本，
/// 且不掩盖传输层的 HTTP 状态码。
fn extract_error_details(status: u16, body: &[u8]) -> ApiError {
    if let Ok(resp) = sonic_rs::from_slice::<ErrorResponse>(body)
        && !resp.error.message.is_empty()
    {
        // 信封里带合法 code 时以它为准（个别代理层会在外层状态码上失真）。
        let out_status = if resp.error.code > 0 && resp.error.code <= u16::MAX as i64 {
            resp.error.code as u16
        } else {
            status
        };
        return ApiError::Http {
            status: out_status,
            message: resp.error.message,
        };
    }

    ApiError::Http {
        status,
        message: String::from_utf8_lossy(body).trim().to_string(),
    }
}
