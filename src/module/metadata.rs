//! 模块元数据定义
//!
//! 定义模块的生命周期状态、状态转换表、启动/停止选项以及持久化设置。

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// 模块 ID，在模块的整个生命周期内不变
pub type ModuleId = u64;

/// 系统模块的 ID
pub const SYSTEM_MODULE_ID: ModuleId = 0;

/// 系统模块的位置
pub const SYSTEM_MODULE_LOCATION: &str = "System Module";

/// 模块状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    /// 已安装，未解析
    Installed,
    /// 已解析
    Resolved,
    /// 正在启动
    Starting,
    /// 延迟启动，等待首次符号查找触发
    LazyStarting,
    /// 运行中
    Active,
    /// 正在停止
    Stopping,
    /// 已卸载（终态）
    Uninstalled,
}

impl Default for ModuleState {
    fn default() -> Self {
        ModuleState::Installed
    }
}

impl ModuleState {
    /// 是否处于活动集合 `{Starting, LazyStarting, Active, Stopping}`
    ///
    /// 执行上下文只在活动集合内存在。
    pub fn is_active_set(&self) -> bool {
        matches!(
            self,
            ModuleState::Starting
                | ModuleState::LazyStarting
                | ModuleState::Active
                | ModuleState::Stopping
        )
    }

    /// 是否已解析（解析集合包含活动集合与 Resolved）
    pub fn is_resolved_set(&self) -> bool {
        matches!(self, ModuleState::Resolved) || self.is_active_set()
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, ModuleState::Uninstalled)
    }

    /// 状态转换表
    ///
    /// 返回 `(self, event)` 对应的目标状态；非法转换返回 `None`。
    pub fn next(self, event: Transition) -> Option<ModuleState> {
        use ModuleState::*;
        use Transition::*;

        match (self, event) {
            (Uninstalled, _) => None,
            (_, Uninstall) => Some(Uninstalled),

            (Installed, Resolve) => Some(Resolved),

            (Resolved, Start) => Some(Starting),
            (Resolved, LazyStart) => Some(LazyStarting),
            (LazyStarting, Start) => Some(Starting),
            (Starting, Activated) => Some(Active),
            // 激活失败回退
            (Starting, Deactivated) => Some(Resolved),

            (Active, Stop) => Some(Stopping),
            (Stopping, Deactivated) => Some(Resolved),
            // 延迟启动的模块从未被激活，直接回到 Resolved
            (LazyStarting, Deactivated) => Some(Resolved),

            (Installed, Update) | (Resolved, Update) => Some(Installed),

            _ => None,
        }
    }
}

impl std::fmt::Display for ModuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModuleState::Installed => "INSTALLED",
            ModuleState::Resolved => "RESOLVED",
            ModuleState::Starting => "STARTING",
            ModuleState::LazyStarting => "LAZY_STARTING",
            ModuleState::Active => "ACTIVE",
            ModuleState::Stopping => "STOPPING",
            ModuleState::Uninstalled => "UNINSTALLED",
        };
        f.write_str(name)
    }
}

/// 状态机事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    /// 解析当前代
    Resolve,
    /// 开始激活
    Start,
    /// 按激活策略延迟启动
    LazyStart,
    /// 激活完成
    Activated,
    /// 开始停用
    Stop,
    /// 停用完成（或激活失败回退）
    Deactivated,
    /// 替换当前代
    Update,
    /// 卸载
    Uninstall,
}

bitflags! {
    /// 启动选项
    ///
    /// 原始的整数选项通过 [`StartOptions::from_bits_truncate`] 解码，未知位被忽略。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StartOptions: u32 {
        /// 临时启动：不修改持久化的自动启动设置
        const TRANSIENT = 0x01;
        /// 遵循模块声明的激活策略（延迟激活）
        const USE_ACTIVATION_POLICY = 0x02;
        /// 由符号查找失败触发的延迟激活（内部使用）
        const LAZY_TRIGGER = 0x04;
    }
}

impl StartOptions {
    /// 从调用方给出的整数选项解码，只保留公开的标志位
    pub fn from_raw(bits: u32) -> Self {
        Self::from_bits_truncate(bits) & (Self::TRANSIENT | Self::USE_ACTIVATION_POLICY)
    }
}

bitflags! {
    /// 停止选项
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StopOptions: u32 {
        /// 临时停止：不清除持久化的自动启动设置
        const TRANSIENT = 0x01;
    }
}

bitflags! {
    /// 模块的持久化设置
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ModuleSettings: u32 {
        /// 框架启动时自动启动
        const AUTO_START = 0x01;
        /// 自动启动时遵循激活策略
        const USE_ACTIVATION_POLICY = 0x02;
    }
}

/// 模块描述信息
///
/// 模块的不变身份（ID 与位置）与可变的启动级别、设置。
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    /// 模块 ID
    pub id: ModuleId,
    /// 安装位置
    pub location: String,
    /// 启动级别
    pub start_level: i32,
    /// 持久化设置
    pub settings: ModuleSettings,
}

impl ModuleDescriptor {
    /// 创建新的模块描述
    pub fn new(id: ModuleId, location: impl Into<String>, start_level: i32) -> Self {
        Self {
            id,
            location: location.into(),
            start_level,
            settings: ModuleSettings::empty(),
        }
    }

    /// 是否为系统模块
    pub fn is_system(&self) -> bool {
        self.id == SYSTEM_MODULE_ID
    }
}
