use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;
const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 15;
const DEFAULT_RETRY_MAX_ATTEMPTS: usize = 3;
const DEFAULT_COOLDOWN_SECS: u64 = 60;
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_UPSTREAM_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// 密钥来源环境变量（逗号分隔）。设置后 config.toml 里的 api_keys 被整体忽略。
pub const ENV_API_KEYS: &str = "GEMINI_API_KEYS";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,

    /// 参与轮换的 key 列表（已去除空白项；去重交给密钥池）。
    pub api_keys: Vec<String>,
    pub retry_max_attempts: usize,
    /// 隔离冷却秒数；0 关闭自动复活。
    pub cooldown_secs: u64,

    pub cache_ttl_secs: u64,

    pub upstream_base_url: String,
    pub upstream_timeout_ms: u64,

    pub debug: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(alias = "HOST")]
    host: Option<String>,
    #[serde(alias = "PORT")]
    port: Option<u16>,

    #[serde(alias = "READ_TIMEOUT_SECS")]
    read_timeout_secs: Option<u64>,
    #[serde(alias = "WRITE_TIMEOUT_SECS")]
    write_timeout_secs: Option<u64>,
    #[serde(alias = "SHUTDOWN_TIMEOUT_SECS")]
    shutdown_timeout_secs: Option<u64>,

    /// config.toml 中的枚举列表；GEMINI_API_KEYS 存在时被忽略。
    api_keys: Option<Vec<String>>,
    #[serde(alias = "GEMINI_API_KEYS")]
    gemini_api_keys: Option<String>,

    #[serde(alias = "RETRY_MAX_ATTEMPTS")]
    retry_max_attempts: Option<usize>,
    #[serde(alias = "COOLDOWN_SECS")]
    cooldown_secs: Option<u64>,

    #[serde(alias = "CACHE_TTL_SECS")]
    cache_ttl_secs: Option<u64>,

    #[serde(alias = "UPSTREAM_BASE_URL")]
    upstream_base_url: Option<String>,
    #[serde(alias = "UPSTREAM_TIMEOUT_MS")]
    upstream_timeout_ms: Option<u64>,

    #[serde(alias = "DEBUG")]
    debug: Option<String>,
}

impl Config {
    pub fn load() -> Self {
        load_dotenv();

        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        let raw = Figment::from(Toml::file(&config_file))
            .merge(Env::raw())
            .extract::<RawConfig>()
            .unwrap_or_default();

        // 环境变量优先：一旦设置 GEMINI_API_KEYS，文件里的 api_keys 整体失效。
        let api_keys = match raw.gemini_api_keys.as_deref() {
            Some(s) if !s.trim().is_empty() => parse_key_list(s),
            _ => raw
                .api_keys
                .unwrap_or_default()
                .iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
        };

        Self {
            host: raw.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: raw.port.unwrap_or(DEFAULT_PORT),
            read_timeout_secs: raw.read_timeout_secs.unwrap_or(DEFAULT_READ_TIMEOUT_SECS),
            write_timeout_secs: raw.write_timeout_secs.unwrap_or(DEFAULT_WRITE_TIMEOUT_SECS),
            shutdown_timeout_secs: raw
                .shutdown_timeout_secs
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            api_keys,
            retry_max_attempts: raw
                .retry_max_attempts
                .unwrap_or(DEFAULT_RETRY_MAX_ATTEMPTS)
                .max(1),
            cooldown_secs: raw.cooldown_secs.unwrap_or(DEFAULT_COOLDOWN_SECS),
            cache_ttl_secs: raw.cache_ttl_secs.unwrap_or(DEFAULT_CACHE_TTL_SECS),
            upstream_base_url: raw
                .upstream_base_url
                .map(|u| u.trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| DEFAULT_UPSTREAM_BASE_URL.to_string()),
            upstream_timeout_ms: raw.upstream_timeout_ms.unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_MS),
            debug: raw.debug.unwrap_or_else(|| "off".to_string()),
        }
    }

    pub fn log_level(&self) -> crate::logging::LogLevel {
        crate::logging::LogLevel::parse(&self.debug)
    }

    pub fn client_log_enabled(&self) -> bool {
        self.log_level().client_enabled()
    }

    pub fn backend_log_enabled(&self) -> bool {
        self.log_level().backend_enabled()
    }
}

/// 解析逗号分隔的 key 列表，去空白、丢弃空项。
fn parse_key_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect()
}

fn load_dotenv() {
    let Some(path) = locate_dotenv() else {
        return;
    };
    let Ok(content) = std::fs::read_to_string(&path) else {
        return;
    };

    for line in content.lines() {
        let Some((key, value)) = parse_env_line(line) else {
            continue;
        };
        // 已经存在的环境变量优先于 .env。
        if std::env::var_os(key).is_some() {
            continue;
        }
        // set_var 在 Rust 2024 标记为 unsafe（并发读写进程环境是 UB）。
        // 此处在启动早期、尚未起任何任务时调用，满足前提。
        unsafe {
            std::env::set_var(key, value);
        }
    }
}

/// 从当前目录向上找最近的 .env；越过项目边界（Cargo.toml / .git）就放弃。
fn locate_dotenv() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    for dir in cwd.ancestors() {
        let candidate = dir.join(".env");
        if candidate.is_file() {
            return Some(candidate);
        }
        if is_project_root(dir) {
            return None;
        }
    }
    None
}

fn is_project_root(dir: &Path) -> bool {
    dir.join("Cargo.toml").is_file() || dir.join(".git").is_dir()
}

/// 解析一行 `KEY=VALUE`。支持 `export` 前缀、成对引号，
/// 以及未加引号值里"空白 + #"开始的行内注释。
fn parse_env_line(line: &str) -> Option<(&str, String)> {
    let line = line.trim();
    let line = line
        .strip_prefix("export ")
        .map(str::trim_start)
        .unwrap_or(line);
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }

    let value = value.trim();
    // 成对引号：取引号内原文，不再剥注释。
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return Some((key, value[1..value.len() - 1].to_string()));
        }
    }

    let value = match value
        .char_indices()
        .find(|&(i, c)| c == '#' && (i == 0 || value[..i].ends_with([' ', '\t'])))
    {
        Some((i, _)) => value[..i].trim_end(),
        None => value,
    };
    Some((key, value.to_string()))
}
