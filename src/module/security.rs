//! 权限检查
//!
//! 生命周期操作在状态机之前先做权限检查。拒绝时返回
//! [`CoreError::PermissionDenied`]；只读访问器把拒绝恢复为默认值。

use std::collections::HashSet;

use parking_lot::RwLock;

use super::metadata::ModuleId;
use crate::utils::{CoreError, Result};

/// 管理操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdminAction {
    /// 启动、停止
    Execute,
    /// 安装、更新、卸载
    Lifecycle,
    /// 资源查找
    Resource,
    /// 符号查找
    Class,
    /// 读取元数据
    Metadata,
    /// 获取执行上下文
    Context,
}

/// 权限检查接口
pub trait PermissionChecker: Send + Sync {
    /// 检查对目标模块执行操作的权限
    fn check(&self, subject: ModuleId, action: AdminAction) -> Result<()>;
}

/// 允许全部操作
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllPermissions;

impl PermissionChecker for AllowAllPermissions {
    fn check(&self, _subject: ModuleId, _action: AdminAction) -> Result<()> {
        Ok(())
    }
}

/// 基于拒绝列表的权限检查
#[derive(Debug, Default)]
pub struct DenyListPermissions {
    denied: RwLock<HashSet<(ModuleId, AdminAction)>>,
}

impl DenyListPermissions {
    /// 创建空的拒绝列表
    pub fn new() -> Self {
        Self::default()
    }

    /// 拒绝对某模块的某项操作
    pub fn deny(&self, subject: ModuleId, action: AdminAction) {
        self.denied.write().insert((subject, action));
    }

    /// 撤销拒绝
    pub fn allow(&self, subject: ModuleId, action: AdminAction) {
        self.denied.write().remove(&(subject, action));
    }
}

impl PermissionChecker for DenyListPermissions {
    fn check(&self, subject: ModuleId, action: AdminAction) -> Result<()> {
        if self.denied.read().contains(&(subject, action)) {
            return Err(CoreError::PermissionDenied(format!(
                "模块 {} 不允许执行 {:?}",
                subject, action
            )));
        }
        Ok(())
    }
}
