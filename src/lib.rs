//! # Bundle Core - 动态模块框架内核
//!
//! 动态模块框架的运行时内核，提供以下核心功能：
//!
//! - **生命周期状态机**: 每个模块一个控制器，负责安装、解析、启动、停止、更新与卸载
//! - **延迟激活**: 按激活策略启动的模块在第一次查找失败时才真正激活
//! - **依赖方委托**: 本地找不到的符号和资源按依赖图在依赖方中继续查找
//! - **生命周期事件**: 每次状态变化后发布事件
//! - **配置管理**: YAML / JSON 配置加载
//! - **日志系统**: 结构化日志记录
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bundle_core::{Framework, FrameworkConfig, MemoryContentStore, ModuleContent, StartOptions};
//! use semver::Version;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryContentStore::new());
//!     store.stage(
//!         "mem:greeter",
//!         ModuleContent::new("org.example.greeter", Version::new(1, 0, 0))
//!             .symbol("org.example.Greeter"),
//!     );
//!
//!     // 创建框架并安装模块
//!     let framework = Framework::new(FrameworkConfig::default(), store)?;
//!     let greeter = framework.install("mem:greeter").await?;
//!     greeter.start(StartOptions::empty()).await?;
//!
//!     let symbol = greeter.find_symbol("org.example.Greeter").await?;
//!     assert!(symbol.is_some());
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `module` - 状态机、代、依赖图、委托策略与生命周期控制器
//! - `utils` - 错误类型与日志
//! - `core` - 框架配置
//! - `api` - 框架根对象

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod api;
pub mod core;
pub mod module;
pub mod utils;

// 重导出常用类型，方便使用
pub use module::{
    AdminAction, BroadcastEventPublisher, ContentStore, DelegationPolicy, DependencyGraph,
    DependentPolicy, EventPublisher, ExecutionContext, FrameworkServices, Generation,
    LifecycleEvent, LifecycleEventKind, MemoryContentStore, ModuleActivator, ModuleContent,
    ModuleDescriptor, ModuleId, ModuleLifecycleController, ModuleSettings, ModuleState,
    PermissionChecker, RegisteredPolicy, Resource, StartOptions, StopOptions, StopOutcome,
    Symbol, SymbolProvider, WiringGraph,
};

pub use utils::logger::{fields, LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};
pub use utils::{error_code, CoreError, ErrorKind, Result};

pub use api::Framework;
pub use core::config::{
    DelegationKind, FrameworkConfig, FrameworkConfigBuilder, LifecycleConfig, LogConfig,
    ResolverConfig,
};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
