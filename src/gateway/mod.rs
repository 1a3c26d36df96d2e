pub mod cost;
pub mod handler;
pub mod middleware;
pub mod retry;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use crate::cache::ResponseCache;
use crate::config::Config;
use crate::gemini::client::GeminiClient;
use crate::keypool::KeyPool;

/// 所有请求处理器共享的状态。进程启动时构造一次，经 Arc 注入路由，
/// 不存在模块级可变全局。
#[derive(Debug)]
pub struct ProxyState {
    pub cfg: Config,
    pub pool: Arc<KeyPool>,
    pub cache: Arc<ResponseCache>,
    pub gemini: GeminiClient,
    pub cost: cost::CostEstimator,
}

impl ProxyState {
    pub fn new(cfg: Config) -> Result<Self, anyhow::Error> {
        let pool = Arc::new(KeyPool::new(
            &cfg.api_keys,
            Duration::from_secs(cfg.cooldown_secs),
        ));
        let cache = Arc::new(ResponseCache::new(Duration::from_secs(cfg.cache_ttl_secs)));
        let gemini = GeminiClient::new(&cfg)?;

        Ok(Self {
            cfg,
            pool,
            cache,
            gemini,
            cost: cost::CostEstimator::new(),
        })
    }
}
