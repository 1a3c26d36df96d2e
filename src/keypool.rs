//! 密钥池：round-robin 轮换 + 熔断隔离 + 冷却自动复活。
//!
//! 选择走原子计数器 + alive 读锁；隔离（dead 表）使用独立的锁以降低
//! 选择路径上的争用。写路径固定先取 dead 锁、再取 alive 锁。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("密钥池中没有可用的 API key")]
    NoKeysAvailable,
}

#[derive(Debug)]
pub struct KeyPool {
    /// 当前参与轮换的 key（保持加入顺序，轮换结果可预测）。
    alive: RwLock<Vec<String>>,
    /// 被隔离的 key 及其进入隔离的时刻。
    dead: RwLock<HashMap<String, Instant>>,
    /// 轮换计数器：只增不减，取模时才读 alive 长度。
    index: AtomicU64,
    /// 隔离冷却时长；为零时关闭自动复活，只能显式 revive。
    cooldown: Duration,
    /// 构造时的完整成员集合，用于拒绝未知 key 的操作。构造后不变。
    original: HashSet<String>,
}

impl KeyPool {
    /// 构造密钥池：去重（保序）、丢弃空串，全部 key 初始为 alive。
    pub fn new(keys: &[String], cooldown: Duration) -> Self {
        let mut alive = Vec::with_capacity(keys.len());
        let mut original = HashSet::with_capacity(keys.len());
        for key in keys {
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            if original.insert(key.to_string()) {
                alive.push(key.to_string());
            }
        }

        Self {
            alive: RwLock::new(alive),
            dead: RwLock::new(HashMap::new()),
            index: AtomicU64::new(0),
            cooldown,
            original,
        }
    }

    /// 取下一个可用 key（round-robin）。
    ///
    /// 复活检查先于空池判断：全员隔离但冷却已到时，本次调用即可恢复轮换。
    /// 长度与下标在同一把读锁内读取，保证 (len, element) 一致。
    pub async fn next_key(&self) -> Result<String, PoolError> {
        self.revive_expired().await;

        let alive = self.alive.read().await;
        if alive.is_empty() {
            return Err(PoolError::NoKeysAvailable);
        }

        let n = self.index.fetch_add(1, Ordering::Relaxed);
        let idx = (n % alive.len() as u64) as usize;
        Ok(alive[idx].clone())
    }

    /// 把 key 移出轮换并记录隔离时刻（熔断）。
    ///
    /// 非池内 key 为 no-op；重复标记会刷新时间戳，相当于重置冷却。
    pub async fn mark_dead(&self, key: &str) {
        let key = key.trim();
        if key.is_empty() || !self.original.contains(key) {
            return;
        }

        {
            let mut dead = self.dead.write().await;
            dead.insert(key.to_string(), Instant::now());
        }

        let mut alive = self.alive.write().await;
        alive.retain(|k| k != key);
    }

    /// 显式复活：从 dead 表移除并追加回 alive 尾部。
    ///
    /// 非池内 key 或本来就不在 dead 表中的 key 为 no-op，不会产生重复。
    pub async fn revive(&self, key: &str) {
        let key = key.trim();
        if key.is_empty() || !self.original.contains(key) {
            return;
        }

        let was_dead = {
            let mut dead = self.dead.write().await;
            dead.remove(key).is_some()
        };
        if !was_dead {
            return;
        }

        let mut alive = self.alive.write().await;
        if !alive.iter().any(|k| k == key) {
            alive.push(key.to_string());
        }
    }

    /// 复活所有冷却已到期的 key；cooldown 为零时不做任何事。
    async fn revive_expired(&self) {
        if self.cooldown.is_zero() {
            return;
        }

        let now = Instant::now();
        let due: Vec<String> = {
            let dead = self.dead.read().await;
            dead.iter()
                .filter(|(_, died_at)| now.duration_since(**died_at) >= self.cooldown)
                .map(|(k, _)| k.clone())
                .collect()
        };

        for key in due {
            self.revive(&key).await;
        }
    }

    pub async fn alive_count(&self) -> usize {
        self.alive.read().await.len()
    }

    pub async fn dead_count(&self) -> usize {
        self.dead.read().await.len()
    }

    /// 池内 key 总数（alive + dead），构造后恒定。
    pub fn total_count(&self) -> usize {
        self.original.len()
    }

    /// alive 列表快照（副本，调用方不会拿到内部引用）。
    pub async fn alive_keys(&self) -> Vec<String> {
        self.alive.read().await.clone()
    }

    /// dead 表快照（副本）。
    pub async fn dead_keys(&self) -> HashMap<String, Instant> {
        self.dead.read().await.clone()
    }

    pub async fn is_dead(&self, key: &str) -> bool {
        self.dead.read().await.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn new_deduplicates_and_drops_empty() {
        let pool = KeyPool::new(
            &keys(&["key1", "key2", "key1", "", "key3", "key2", ""]),
            Duration::from_secs(60),
        );
        assert_eq!(pool.alive_count().await, 3);
        assert_eq!(pool.total_count(), 3);
        assert_eq!(pool.alive_keys().await, keys(&["key1", "key2", "key3"]));
    }

    #[tokio::test]
    async fn next_key_round_robin_order() {
        let pool = KeyPool::new(&keys(&["key1", "key2", "key3"]), Duration::ZERO);
        for i in 0..9 {
            let key = pool.next_key().await.unwrap();
            let expected = ["key1", "key2", "key3"][i % 3];
            assert_eq!(key, expected, "第 {i} 次选择");
        }
    }

    #[tokio::test]
    async fn next_key_empty_pool() {
        let pool = KeyPool::new(&[], Duration::ZERO);
        assert_eq!(pool.next_key().await, Err(PoolError::NoKeysAvailable));
    }

    #[tokio::test]
    async fn mark_dead_removes_from_rotation() {
        let pool = KeyPool::new(&keys(&["key1", "key2", "key3"]), Duration::ZERO);
        pool.mark_dead("key2").await;

        assert_eq!(pool.alive_count().await, 2);
        assert_eq!(pool.dead_count().await, 1);
        assert!(pool.is_dead("key2").await);

        for _ in 0..10 {
            assert_ne!(pool.next_key().await.unwrap(), "key2");
        }
    }

    #[tokio::test]
    async fn mark_dead_then_next_never_returns_marked_key() {
        let pool = KeyPool::new(&keys(&["key1", "key2"]), Duration::ZERO);
        pool.mark_dead("key1").await;
        assert_eq!(pool.next_key().await.unwrap(), "key2");
    }

    #[tokio::test]
    async fn all_dead_returns_no_keys_available() {
        let pool = KeyPool::new(&keys(&["key1", "key2"]), Duration::ZERO);
        pool.mark_dead("key1").await;
        pool.mark_dead("key2").await;
        assert_eq!(pool.next_key().await, Err(PoolError::NoKeysAvailable));
    }

    #[tokio::test]
    async fn revive_restores_exactly_once() {
        let pool = KeyPool::new(&keys(&["key1", "key2", "key3"]), Duration::ZERO);
        pool.mark_dead("key2").await;
        assert_eq!(pool.alive_count().await, 2);

        pool.revive("key2").await;
        assert_eq!(pool.alive_count().await, 3);
        assert!(!pool.is_dead("key2").await);

        // 重复复活不产生重复条目。
        pool.revive("key2").await;
        assert_eq!(pool.alive_count().await, 3);
    }

    #[tokio::test]
    async fn mark_dead_twice_refreshes_timestamp() {
        let pool = KeyPool::new(&keys(&["key1", "key2"]), Duration::ZERO);
        pool.mark_dead("key1").await;
        let first = pool.dead_keys().await["key1"];

        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.mark_dead("key1").await;
        let second = pool.dead_keys().await["key1"];

        assert!(second > first);
        assert_eq!(pool.alive_count().await, 1);
        assert_eq!(pool.dead_count().await, 1);
    }

    #[tokio::test]
    async fn auto_revival_after_cooldown() {
        let cooldown = Duration::from_millis(50);
        let pool = KeyPool::new(&keys(&["key1", "key2"]), cooldown);
        pool.mark_dead("key1").await;
        assert!(pool.is_dead("key1").await);

        tokio::time::sleep(cooldown + Duration::from_millis(20)).await;

        // next_key 触发复活检查。
        let _ = pool.next_key().await.unwrap();
        assert!(!pool.is_dead("key1").await);
        assert_eq!(pool.alive_count().await, 2);
    }

    #[tokio::test]
    async fn zero_cooldown_disables_auto_revival() {
        let pool = KeyPool::new(&keys(&["key1", "key2"]), Duration::ZERO);
        pool.mark_dead("key1").await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        let _ = pool.next_key().await.unwrap();
        assert!(pool.is_dead("key1").await);

        pool.revive("key1").await;
        assert!(!pool.is_dead("key1").await);
    }

    #[tokio::test]
    async fn unknown_key_operations_are_noops() {
        let pool = KeyPool::new(&keys(&["key1", "key2"]), Duration::ZERO);
        pool.mark_dead("unknown_key").await;
        assert_eq!(pool.alive_count().await, 2);
        assert_eq!(pool.dead_count().await, 0);

        pool.revive("unknown_key").await;
        assert_eq!(pool.alive_count().await, 2);
    }

    #[tokio::test]
    async fn snapshots_are_copies() {
        let pool = KeyPool::new(&keys(&["key1", "key2", "key3"]), Duration::ZERO);
        pool.mark_dead("key2").await;

        let mut snapshot = pool.alive_keys().await;
        snapshot[0] = "modified".to_string();
        assert_eq!(pool.alive_keys().await[0], "key1");

        let dead = pool.dead_keys().await;
        assert_eq!(dead.len(), 1);
        assert!(dead.contains_key("key2"));
    }

    #[tokio::test]
    async fn total_count_is_invariant() {
        let pool = KeyPool::new(&keys(&["key1", "key2", "key3"]), Duration::ZERO);
        pool.mark_dead("key1").await;
        pool.mark_dead("key2").await;
        assert_eq!(pool.total_count(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_selection_is_balanced() {
        let names = ["key1", "key2", "key3", "key4", "key5"];
        let pool = std::sync::Arc::new(KeyPool::new(&keys(&names), Duration::ZERO));

        const TASKS: usize = 100;
        const ITERATIONS: usize = 100;

        let mut handles = Vec::with_capacity(TASKS);
        for _ in 0..TASKS {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                let mut counts: HashMap<String, u64> = HashMap::new();
                for _ in 0..ITERATIONS {
                    let key = pool.next_key().await.unwrap();
                    *counts.entry(key).or_default() += 1;
                }
                counts
            }));
        }

        let mut totals: HashMap<String, u64> = HashMap::new();
        for h in handles {
            for (k, c) in h.await.unwrap() {
                *totals.entry(k).or_default() += c;
            }
        }

        let expected = (TASKS * ITERATIONS / names.len()) as u64;
        let tolerance = expected / 10;
        for name in names {
            let count = totals.get(name).copied().unwrap_or(0);
            assert!(
                count >= expected - tolerance && count <= expected + tolerance,
                "{name} 被选中 {count} 次，期望约 {expected}（±{tolerance}）"
            );
        }
    }
}
