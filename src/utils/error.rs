//! 模块框架错误类型定义
//!
//! 本模块定义了内核中使用的所有错误类型，以及它们到错误分类（[`ErrorKind`]）
//! 和稳定错误码的映射。

use thiserror::Error;

/// 模块框架核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    // ==================== 生命周期错误 ====================

    /// 当前状态下不允许该操作（包括对已卸载模块的任何操作）
    #[error("非法操作: {0}")]
    InvalidOperation(String),

    /// 依赖解析失败
    #[error("模块 {module} 解析失败: {report}")]
    Resolve {
        module: u64,
        report: String,
    },

    /// 激活/停用回调失败
    #[error("模块 {module} 激活回调失败: {source}")]
    Activation {
        module: u64,
        #[source]
        source: anyhow::Error,
    },

    /// 读取模块内容失败（更新时）
    #[error("读取模块 {module} 的内容失败: {source}")]
    ContentRead {
        module: u64,
        #[source]
        source: std::io::Error,
    },

    /// 权限被拒绝
    #[error("权限被拒绝: {0}")]
    PermissionDenied(String),

    /// 内部不变量被破坏，不可恢复
    #[error("非法内部状态: {0}")]
    IllegalState(String),

    // ==================== 模块管理错误 ====================

    /// 模块未找到
    #[error("模块未找到: {0}")]
    ModuleNotFound(u64),

    /// 位置已被其他模块占用
    #[error("位置已安装: '{0}'")]
    DuplicateLocation(String),

    // ==================== 配置错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    /// 初始化失败
    #[error("初始化失败: {0}")]
    InitFailed(String),

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// 内核操作结果类型别名
pub type Result<T> = std::result::Result<T, CoreError>;

/// 错误分类
///
/// 调用方通常只关心错误属于哪一类，而不是具体的变体。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 当前状态下不允许的操作
    InvalidOperation,
    /// 依赖解析失败
    Resolve,
    /// 激活/停用回调失败
    Activation,
    /// 内容读写失败
    Io,
    /// 权限不足
    Security,
    /// 内部状态损坏
    State,
    /// 配置相关
    Config,
    /// 其他
    Other,
}

/// 错误码常量
pub mod error_code {
    // 生命周期错误 (LIFECYCLE-xxx)
    pub const LIFECYCLE_INVALID_OPERATION: &str = "LIFECYCLE-001";
    pub const LIFECYCLE_RESOLVE_FAILED: &str = "LIFECYCLE-002";
    pub const LIFECYCLE_ACTIVATION_FAILED: &str = "LIFECYCLE-003";
    pub const LIFECYCLE_ILLEGAL_STATE: &str = "LIFECYCLE-004";

    // 模块错误 (MODULE-xxx)
    pub const MODULE_NOT_FOUND: &str = "MODULE-001";
    pub const MODULE_DUPLICATE_LOCATION: &str = "MODULE-002";

    // 内容错误 (CONTENT-xxx)
    pub const CONTENT_READ_FAILED: &str = "CONTENT-001";

    // 权限错误 (PERMISSION-xxx)
    pub const PERMISSION_DENIED: &str = "PERMISSION-001";

    // 配置错误 (CONFIG-xxx)
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";
    pub const CORE_INIT_FAILED: &str = "CORE-001";
}

impl CoreError {
    /// 构造非法操作错误
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        CoreError::InvalidOperation(message.into())
    }

    /// 构造激活失败错误
    pub fn activation(module: u64, source: impl Into<anyhow::Error>) -> Self {
        CoreError::Activation {
            module,
            source: source.into(),
        }
    }

    /// 获取错误分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidOperation(_) | CoreError::DuplicateLocation(_) => {
                ErrorKind::InvalidOperation
            }
            CoreError::Resolve { .. } => ErrorKind::Resolve,
            CoreError::Activation { .. } => ErrorKind::Activation,
            CoreError::ContentRead { .. } | CoreError::Io(_) => ErrorKind::Io,
            CoreError::PermissionDenied(_) => ErrorKind::Security,
            CoreError::IllegalState(_) => ErrorKind::State,
            CoreError::ConfigLoadFailed(_)
            | CoreError::InitFailed(_)
            | CoreError::Json(_)
            | CoreError::Yaml(_) => ErrorKind::Config,
            CoreError::ModuleNotFound(_) | CoreError::Other(_) => ErrorKind::Other,
        }
    }

    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::InvalidOperation(_) => error_code::LIFECYCLE_INVALID_OPERATION,
            CoreError::Resolve { .. } => error_code::LIFECYCLE_RESOLVE_FAILED,
            CoreError::Activation { .. } => error_code::LIFECYCLE_ACTIVATION_FAILED,
            CoreError::IllegalState(_) => error_code::LIFECYCLE_ILLEGAL_STATE,
            CoreError::ModuleNotFound(_) => error_code::MODULE_NOT_FOUND,
            CoreError::DuplicateLocation(_) => error_code::MODULE_DUPLICATE_LOCATION,
            CoreError::ContentRead { .. } | CoreError::Io(_) => error_code::CONTENT_READ_FAILED,
            CoreError::PermissionDenied(_) => error_code::PERMISSION_DENIED,
            CoreError::ConfigLoadFailed(_) | CoreError::Json(_) | CoreError::Yaml(_) => {
                error_code::CONFIG_LOAD_FAILED
            }
            CoreError::InitFailed(_) => error_code::CORE_INIT_FAILED,
            CoreError::Other(_) => "UNKNOWN",
        }
    }

    /// 是否为不可恢复的错误
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::IllegalState(_))
    }
}
