//! 响应缓存：请求体指纹 -> 最近一次成功响应的原始字节。
//!
//! 过期策略是"访问时惰性删除 + 后台定时清理"的组合，不做 LRU。
//! 命中/未命中计数只增不减。

use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// 后台清理周期。
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// 计算请求体指纹：原始字节的 SHA-256（小写 hex）。
///
/// 不做 JSON 规范化：字节不同的等价请求体视为不同指纹。
pub fn fingerprint(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

#[derive(Debug, Clone)]
struct CacheEntry {
    /// 之前发给客户端的完整 JSON 字节，命中时原样返回。
    response: Bytes,
    expire_at: Instant,
    /// 写入时刻，仅用于诊断。
    #[allow(dead_code)]
    created_at: Instant,
}

#[derive(Debug)]
pub struct ResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// 查缓存。条目缺失或已过期均计一次 miss；过期条目就地删除。
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                Some(e) if e.expire_at > now => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(e.response.clone());
                }
                Some(_) => {}
            }
        }

        // 条目已过期：换写锁做惰性删除。持锁间隙可能有并发 set 写入新条目，需复查。
        let mut entries = self.entries.write().await;
        if let Some(e) = entries.get(key)
            && e.expire_at > Instant::now()
        {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(e.response.clone());
        }
        entries.remove(key);
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// 写入（覆盖同指纹的旧条目）。准入控制在网关：只有 2xx 响应会进来。
    pub async fn set(&self, key: String, response: Bytes) {
        let now = Instant::now();
        let entry = CacheEntry {
            response,
            expire_at: now + self.ttl,
            created_at: now,
        };
        self.entries.write().await.insert(key, entry);
    }

    /// 清理所有已过期条目，返回删除数量。
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.expire_at > now);
        before - entries.len()
    }

    /// 启动后台清理任务。
    pub fn spawn_sweeper(self: Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let cache = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let removed = cache.sweep().await;
                if removed > 0 {
                    tracing::debug!("缓存清理：移除 {removed} 条过期条目");
                }
            }
        })
    }

    /// (hits, misses, 当前条目数)。
    pub async fn stats(&self) -> (u64, u64, usize) {
        let size = self.entries.read().await.len();
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            size,
        )
    }
}
