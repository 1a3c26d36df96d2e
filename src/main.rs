pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod gemini;
pub mod keypool;
pub mod logging;
pub mod util;

use anyhow::Context;
use axum::Router;
use axum::routing::{get, post};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::Config::load();

    init_tracing();

    if cfg.api_keys.is_empty() {
        anyhow::bail!(
            "未配置任何 Gemini API key：请设置 GEMINI_API_KEYS（逗号分隔）或在 config.toml 中提供 api_keys"
        );
    }

    let state = Arc::new(gateway::ProxyState::new(cfg.clone()).context("初始化代理状态失败")?);
    Arc::clone(&state.cache).spawn_sweeper(cache::SWEEP_INTERVAL);

    tracing::info!(
        total_keys = state.pool.total_count(),
        cooldown_secs = cfg.cooldown_secs,
        retry_max_attempts = cfg.retry_max_attempts,
        "密钥池初始化完成"
    );

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], cfg.port)));

    tracing::info!("Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("绑定监听端口失败")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Duration::from_secs(
            cfg.shutdown_timeout_secs,
        )))
        .await
        .context("服务异常退出")?;

    tracing::info!("服务已停止");
    Ok(())
}

/// 组装完整路由（测试复用同一套中间件栈）。
///
/// 层次自外向内：panic 兜底 -> CORS -> 请求超时 -> 凭证剥离 -> 处理器。
/// 读/写超时之和构成单个请求的总时长上限（读体发生在处理器 future 内，
/// 同样被这层超时覆盖）。
pub fn build_router(state: Arc<gateway::ProxyState>) -> Router {
    let request_timeout = Duration::from_secs(
        (state.cfg.read_timeout_secs + state.cfg.write_timeout_secs).max(1),
    );

    Router::new()
        .route("/health", get(gateway::handler::handle_health))
        .route("/v1/models", get(gateway::handler::handle_list_models))
        .route(
            "/v1/chat/completions",
            post(gateway::handler::handle_chat_completions),
        )
        // 兼容不带 /v1 前缀的同一路径
        .route(
            "/chat/completions",
            post(gateway::handler::handle_chat_completions),
        )
        .with_state(state)
        .layer(axum::middleware::from_fn(
            gateway::middleware::strip_sensitive_headers,
        ))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(CatchPanicLayer::custom(gateway::middleware::panic_response))
}

fn init_tracing() {
    let env = std::env::var("RUST_LOG").unwrap_or_default();
    let env = env.trim();
    let filter = if env.is_empty() {
        EnvFilter::new("warn,oai2gemini=info")
    } else if env.contains("oai2gemini") {
        EnvFilter::new(env)
    } else {
        EnvFilter::new(format!("{env},oai2gemini=info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .try_init();
}

async fn shutdown_signal(drain_timeout: Duration) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("收到退出信号，等待未完成请求收尾...");

    // 优雅关闭有上限：超时后不再等慢连接，直接退出进程。
    tokio::spawn(async move {
        tokio::time::sleep(drain_timeout).await;
        tracing::warn!("优雅关闭超时，强制退出");
        std::process::exit(1);
    });
}
