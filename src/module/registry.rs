//! 模块注册表
//!
//! 按模块 ID 和安装位置索引所有生命周期控制器。

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::lifecycle::ModuleLifecycleController;
use super::metadata::{ModuleId, ModuleState, SYSTEM_MODULE_ID};
use crate::utils::{CoreError, Result};

/// 模块注册表
///
/// 安装分两步：先用 [`reserve`](Self::reserve) 占用位置并分配 ID，
/// 读取内容成功后再 [`insert`](Self::insert) 控制器；失败时
/// [`cancel`](Self::cancel) 归还位置。
pub struct ModuleRegistry {
    /// module_id -> 控制器
    modules: RwLock<BTreeMap<ModuleId, Arc<ModuleLifecycleController>>>,

    /// 安装位置 -> module_id（包含已预留但尚未插入的位置）
    locations: RwLock<HashMap<String, ModuleId>>,

    next_id: AtomicU64,
}

impl ModuleRegistry {
    /// 创建空注册表，普通模块 ID 从 1 开始
    pub fn new() -> Self {
        Self {
            modules: RwLock::new(BTreeMap::new()),
            locations: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(SYSTEM_MODULE_ID + 1),
        }
    }

    /// 预留安装位置并分配模块 ID
    ///
    /// # Errors
    ///
    /// 位置已被占用时返回 [`CoreError::DuplicateLocation`]
    pub fn reserve(&self, location: &str) -> Result<ModuleId> {
        let mut locations = self.locations.write();
        if locations.contains_key(location) {
            return Err(CoreError::DuplicateLocation(location.to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        locations.insert(location.to_string(), id);
        Ok(id)
    }

    /// 归还预留的位置
    pub fn cancel(&self, location: &str) {
        self.locations.write().remove(location);
    }

    /// 插入控制器
    ///
    /// 系统模块不经过预留直接插入。
    pub fn insert(&self, controller: Arc<ModuleLifecycleController>) {
        let id = controller.id();
        self.locations.write().insert(controller.location(), id);
        self.modules.write().insert(id, controller);
        tracing::debug!(module_id = id, "模块已注册");
    }

    /// 移除控制器并释放其位置
    pub fn remove(&self, id: ModuleId) -> Option<Arc<ModuleLifecycleController>> {
        let controller = self.modules.write().remove(&id)?;
        self.locations.write().remove(&controller.location());
        tracing::debug!(module_id = id, "模块已移除");
        Some(controller)
    }

    /// 按 ID 获取
    pub fn get(&self, id: ModuleId) -> Option<Arc<ModuleLifecycleController>> {
        self.modules.read().get(&id).cloned()
    }

    /// 按安装位置获取
    pub fn get_by_location(&self, location: &str) -> Option<Arc<ModuleLifecycleController>> {
        let id = *self.locations.read().get(location)?;
        self.get(id)
    }

    /// 全部控制器，按 ID 升序
    pub fn modules(&self) -> Vec<Arc<ModuleLifecycleController>> {
        self.modules.read().values().cloned().collect()
    }

    /// 除系统模块外的控制器，按启动级别排序
    ///
    /// 级别相同时按 ID 升序；`descending` 时整体反转。
    pub fn by_start_level(&self, descending: bool) -> Vec<Arc<ModuleLifecycleController>> {
        let mut modules: Vec<_> = self
            .modules()
            .into_iter()
            .filter(|c| !c.is_system())
            .collect();
        modules.sort_by_key(|c| (c.start_level(), c.id()));
        if descending {
            modules.reverse();
        }
        modules
    }

    /// 处于某状态的模块
    pub fn find_by_state(&self, state: ModuleState) -> Vec<Arc<ModuleLifecycleController>> {
        self.modules()
            .into_iter()
            .filter(|c| c.state() == state)
            .collect()
    }

    /// 模块数量（包括系统模块）
    pub fn count(&self) -> usize {
        self.modules.read().len()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
