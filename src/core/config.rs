//! 框架配置
//!
//! 定义框架的配置结构和加载逻辑。配置文件可以是 YAML 或 JSON，
//! 所有字段都有默认值。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::utils::{CoreError, Result};

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略（minutely / hourly / daily / never）
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
        }
    }
}

/// 生命周期配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// 新安装模块的默认启动级别
    #[serde(default = "default_start_level")]
    pub default_start_level: i32,

    /// 激活器回调超时（毫秒），0 表示不限制
    #[serde(default)]
    pub activation_timeout_ms: u64,

    /// 记录持久化启动/停止请求
    #[serde(default)]
    pub monitor_activation: bool,

    /// 生命周期事件通道容量
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_start_level() -> i32 {
    1
}

fn default_event_capacity() -> usize {
    256
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            default_start_level: default_start_level(),
            activation_timeout_ms: 0,
            monitor_activation: false,
            event_capacity: default_event_capacity(),
        }
    }
}

impl LifecycleConfig {
    /// 激活器回调超时，未配置时为 `None`
    pub fn activation_timeout(&self) -> Option<Duration> {
        (self.activation_timeout_ms > 0).then(|| Duration::from_millis(self.activation_timeout_ms))
    }
}

/// 委托策略类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DelegationKind {
    /// 只搜索注册为委托的依赖方
    #[default]
    Registered,
    /// 搜索全部依赖方
    Dependent,
}

/// 符号解析配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// 本地查找失败后是否在依赖方中继续查找
    #[serde(default = "default_true")]
    pub buddy_delegation: bool,

    /// 委托策略
    #[serde(default)]
    pub policy: DelegationKind,
}

fn default_true() -> bool {
    true
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            buddy_delegation: true,
            policy: DelegationKind::default(),
        }
    }
}

/// 框架配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FrameworkConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,

    /// 生命周期配置
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// 符号解析配置
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// 是否为开发模式
    #[serde(default)]
    pub dev_mode: bool,
}

impl FrameworkConfig {
    /// 创建配置构建器
    pub fn builder() -> FrameworkConfigBuilder {
        FrameworkConfigBuilder::new()
    }

    /// 从文件加载配置
    ///
    /// 扩展名为 `.json` 时按 JSON 解析，否则按 YAML 解析。
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            CoreError::ConfigLoadFailed(format!("无法读取 {}: {}", path.display(), e))
        })?;

        let mut config: FrameworkConfig =
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                serde_json::from_str(&content)?
            } else {
                serde_yaml::from_str(&content)?
            };

        config.config_path = Some(path);
        Ok(config)
    }

    /// 合并另一个配置（用于覆盖）
    pub fn merge(&mut self, other: FrameworkConfig) {
        // 只覆盖非默认值的配置
        if other.logging.level != default_log_level() {
            self.logging.level = other.logging.level;
        }
        if other.logging.file_output {
            self.logging.file_output = true;
            self.logging.log_dir = other.logging.log_dir;
        }
        if other.logging.json_format {
            self.logging.json_format = true;
        }
        if other.lifecycle.default_start_level != default_start_level() {
            self.lifecycle.default_start_level = other.lifecycle.default_start_level;
        }
        if other.lifecycle.activation_timeout_ms != 0 {
            self.lifecycle.activation_timeout_ms = other.lifecycle.activation_timeout_ms;
        }
        if other.lifecycle.monitor_activation {
            self.lifecycle.monitor_activation = true;
        }
        if !other.resolver.buddy_delegation {
            self.resolver.buddy_delegation = false;
        }
        if other.resolver.policy != DelegationKind::default() {
            self.resolver.policy = other.resolver.policy;
        }
        if other.dev_mode {
            self.dev_mode = true;
        }
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct FrameworkConfigBuilder {
    config: FrameworkConfig,
}

impl FrameworkConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self {
            config: FrameworkConfig::default(),
        }
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 启用文件日志
    pub fn file_logging(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.config.logging.file_output = true;
        self.config.logging.log_dir = Some(log_dir.into());
        self
    }

    /// 启用 JSON 格式日志
    pub fn json_logging(mut self) -> Self {
        self.config.logging.json_format = true;
        self
    }

    /// 设置默认启动级别
    pub fn default_start_level(mut self, level: i32) -> Self {
        self.config.lifecycle.default_start_level = level;
        self
    }

    /// 设置激活器回调超时
    pub fn activation_timeout(mut self, timeout: Duration) -> Self {
        self.config.lifecycle.activation_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// 记录持久化启动/停止请求
    pub fn monitor_activation(mut self) -> Self {
        self.config.lifecycle.monitor_activation = true;
        self
    }

    /// 关闭依赖方委托查找
    pub fn disable_buddy_delegation(mut self) -> Self {
        self.config.resolver.buddy_delegation = false;
        self
    }

    /// 设置委托策略
    pub fn delegation_policy(mut self, policy: DelegationKind) -> Self {
        self.config.resolver.policy = policy;
        self
    }

    /// 启用开发模式
    pub fn dev_mode(mut self) -> Self {
        self.config.dev_mode = true;
        self
    }

    /// 构建配置
    pub fn build(self) -> FrameworkConfig {
        self.config
    }
}
