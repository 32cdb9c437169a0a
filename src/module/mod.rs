//! 模块管理
//!
//! 包含模块框架的核心组件：
//! - 模块元数据、状态机与选项位
//! - 代（generation）与内容存储
//! - 依赖图与依赖方委托策略
//! - 生命周期控制器与注册表

pub mod buddy;
pub mod content;
pub mod dependency;
pub mod events;
pub mod generation;
pub mod lifecycle;
pub mod metadata;
pub mod registry;
pub mod runtime;
pub mod security;

// 重导出常用类型
pub use buddy::{DelegationPolicy, DependentPolicy, RegisteredPolicy};
pub use content::{ContentStore, MapSymbolProvider, MemoryContentStore};
pub use dependency::{DependencyGraph, ResolutionFailure, ResolutionReport, WiringGraph};
pub use events::{
    BroadcastEventPublisher, EventPublisher, LifecycleEvent, LifecycleEventKind,
    NoopEventPublisher,
};
pub use generation::{
    Generation, ModuleContent, Resource, Symbol, SymbolProvider, BUDDY_REGISTERED_ATTRIBUTE,
    MODULE_DATA_NAMESPACE,
};
pub use lifecycle::{FrameworkServices, ModuleLifecycleController, StopOutcome};
pub use metadata::{
    ModuleDescriptor, ModuleId, ModuleSettings, ModuleState, StartOptions, StopOptions,
    Transition, SYSTEM_MODULE_ID, SYSTEM_MODULE_LOCATION,
};
pub use registry::ModuleRegistry;
pub use runtime::{ExecutionContext, ModuleActivator, NoopActivator};
pub use security::{AdminAction, AllowAllPermissions, DenyListPermissions, PermissionChecker};
