//! 核心模块
//!
//! 包含框架配置。

pub mod config;

pub use config::{
    DelegationKind, FrameworkConfig, FrameworkConfigBuilder, LifecycleConfig, LogConfig,
    ResolverConfig,
};
