//! 模块运行时
//!
//! 定义模块激活器接口与执行上下文。激活器是模块向框架提供的唯一回调：
//! 启动时调用 `start`，停止时调用 `stop`。

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::metadata::ModuleId;

/// 执行上下文
///
/// 只在模块处于活动集合内时存在；停止时首先被关闭。
#[derive(Debug)]
pub struct ExecutionContext {
    module: ModuleId,
    created_at: DateTime<Utc>,
    closed: AtomicBool,
}

impl ExecutionContext {
    /// 为模块创建新的上下文
    pub fn new(module: ModuleId) -> Self {
        Self {
            module,
            created_at: Utc::now(),
            closed: AtomicBool::new(false),
        }
    }

    /// 所属模块
    pub fn module(&self) -> ModuleId {
        self.module
    }

    /// 创建时间
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// 上下文是否仍然有效
    pub fn is_valid(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// 关闭上下文，之后持有者应停止使用它
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// 模块激活器接口
///
/// 回调返回错误时，启动回退到 `RESOLVED`，停止仍然完成。
#[async_trait]
pub trait ModuleActivator: Send + Sync {
    /// 模块启动
    async fn start(&self, context: &ExecutionContext) -> anyhow::Result<()>;

    /// 模块停止
    async fn stop(&self, context: &ExecutionContext) -> anyhow::Result<()>;
}

/// 空激活器
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopActivator;

#[async_trait]
impl ModuleActivator for NoopActivator {
    async fn start(&self, _context: &ExecutionContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self, _context: &ExecutionContext) -> anyhow::Result<()> {
        Ok(())
    }
}
