//! 网关中间件：客户端凭证剥离与 panic 兜底响应。

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::AppError;

/// 进入处理器之前必须剥离的客户端凭证头。
/// 代理是信任边界：下游带什么凭证都不会被转发到上游。
const STRIPPED_HEADERS: [&str; 4] = [
    "authorization",
    "x-api-key",
    "api-key",
    "proxy-authorization",
];

pub async fn strip_sensitive_headers(mut req: Request, next: Next) -> Response {
    let headers = req.headers_mut();
    for name in STRIPPED_HEADERS {
        headers.remove(name);
    }
    next.run(req).await
}

/// panic 兜底：进程不退出，对外回 OpenAI 形状的 500。
pub fn panic_response(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic"
    };
    tracing::error!("请求处理发生 panic，已拦截: {}", crate::logging::redact(detail));

    AppError::internal("Internal server error").into_response()
}
