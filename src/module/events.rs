//! 生命周期事件
//!
//! 控制器在每次状态变化后发布事件。发布是“发出即忘”的：
//! 发布方不等待任何接收者，接收者也不能影响状态机。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use super::metadata::ModuleId;

/// 默认事件通道容量
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// 生命周期事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    /// 已安装
    Installed,
    /// 已解析
    Resolved,
    /// 已取消解析
    Unresolved,
    /// 开始启动
    Starting,
    /// 进入延迟启动
    LazyActivation,
    /// 已启动
    Started,
    /// 开始停止
    Stopping,
    /// 已停止
    Stopped,
    /// 已更新
    Updated,
    /// 已卸载
    Uninstalled,
    /// 错误（携带原因）
    Error,
}

/// 生命周期事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// 事件类型
    pub kind: LifecycleEventKind,
    /// 相关模块
    pub module: ModuleId,
    /// 原因（错误事件）
    pub cause: Option<String>,
    /// 发生时间
    pub timestamp: DateTime<Utc>,
}

/// 事件发布接口
pub trait EventPublisher: Send + Sync {
    /// 发布事件，不得阻塞
    fn publish(&self, kind: LifecycleEventKind, module: ModuleId, cause: Option<String>);
}

/// 丢弃所有事件
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventPublisher;

impl EventPublisher for NoopEventPublisher {
    fn publish(&self, _kind: LifecycleEventKind, _module: ModuleId, _cause: Option<String>) {}
}

/// 基于 tokio broadcast 通道的事件发布器
///
/// 没有接收者时事件被丢弃；落后的接收者会丢失最早的事件。
#[derive(Debug, Clone)]
pub struct BroadcastEventPublisher {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl BroadcastEventPublisher {
    /// 创建指定容量的发布器
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// 订阅事件流
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// 当前订阅者数量
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastEventPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventPublisher for BroadcastEventPublisher {
    fn publish(&self, kind: LifecycleEventKind, module: ModuleId, cause: Option<String>) {
        let event = LifecycleEvent {
            kind,
            module,
            cause,
            timestamp: Utc::now(),
        };
        trace!(module_id = module, kind = ?kind, "发布生命周期事件");
        // 没有接收者时 send 返回错误，忽略即可
        let _ = self.sender.send(event);
    }
}
