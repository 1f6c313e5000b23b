//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SWARM__*` 覆盖（双下划线表示嵌套，
//! 如 `SWARM__ENGINE__MAX_WORKERS=8`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
}

/// [engine] 段：worker 数、队列容量、各类超时与会话保留期
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// worker 循环数量
    pub max_workers: usize,
    /// 全局并发上限；未设置时等于 max_workers（与 worker 数独立可调）
    pub max_concurrent: Option<usize>,
    /// 队列容量
    pub queue_size: usize,
    /// 入队等待上限（毫秒），超过即返回 QueueFull
    pub enqueue_wait_ms: u64,
    /// 批次等待默认超时（秒）
    pub batch_timeout_secs: u64,
    /// 单任务执行超时（秒，可选；未设置则不限制）
    pub task_timeout_secs: Option<u64>,
    /// 会话终结后的保留期（秒）
    pub retention_secs: u64,
    /// 会话清扫间隔（秒）
    pub sweep_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_concurrent: None,
            queue_size: 256,
            enqueue_wait_ms: 250,
            batch_timeout_secs: 600,
            task_timeout_secs: None,
            retention_secs: 1800,
            sweep_interval_secs: 60,
        }
    }
}

impl EngineConfig {
    pub fn max_workers(&self) -> usize {
        self.max_workers.max(1)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.unwrap_or(self.max_workers).max(1)
    }

    pub fn queue_size(&self) -> usize {
        self.queue_size.max(1)
    }

    pub fn enqueue_wait(&self) -> Duration {
        Duration::from_millis(self.enqueue_wait_ms)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// 从 config 目录加载配置，环境变量 SWARM__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SWARM__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SWARM")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_workers(), 4);
        // 未设置时并发上限跟随 worker 数
        assert_eq!(cfg.max_concurrent(), 4);
        assert_eq!(cfg.queue_size(), 256);
        assert!(cfg.task_timeout().is_none());
        assert_eq!(cfg.retention(), Duration::from_secs(1800));
    }

    #[test]
    fn test_bounds_clamped_to_one() {
        let cfg = EngineConfig {
            max_workers: 0,
            queue_size: 0,
            sweep_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(cfg.max_workers(), 1);
        assert_eq!(cfg.max_concurrent(), 1);
        assert_eq!(cfg.queue_size(), 1);
        assert_eq!(cfg.sweep_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_independent_concurrency_bound() {
        let cfg = EngineConfig {
            max_workers: 8,
            max_concurrent: Some(2),
            ..Default::default()
        };
        assert_eq!(cfg.max_workers(), 8);
        assert_eq!(cfg.max_concurrent(), 2);
    }
}
