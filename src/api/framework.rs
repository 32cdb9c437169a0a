//! 框架根对象
//!
//! [`Framework`] 持有全部协作者、模块注册表和系统模块（ID 0）。
//! 框架本身的启动、停止与更新都委托给系统模块的生命周期控制器。

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use semver::Version;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::config::FrameworkConfig;
use crate::module::content::{ContentStore, MapSymbolProvider};
use crate::module::events::{BroadcastEventPublisher, LifecycleEvent, LifecycleEventKind};
use crate::module::generation::{Generation, ModuleContent};
use crate::module::lifecycle::{FrameworkServices, ModuleLifecycleController, StopOutcome};
use crate::module::metadata::{
    ModuleDescriptor, ModuleId, ModuleSettings, StartOptions, StopOptions, SYSTEM_MODULE_ID,
    SYSTEM_MODULE_LOCATION,
};
use crate::module::registry::ModuleRegistry;
use crate::module::runtime::{ExecutionContext, ModuleActivator, NoopActivator};
use crate::utils::{CoreError, Result};

/// 系统模块的符号名
pub const SYSTEM_SYMBOLIC_NAME: &str = "system.bundle";

/// 系统模块的激活器
///
/// 启动时按启动级别升序启动所有设置了 `AUTO_START` 的模块；
/// 停止时按降序临时停止所有活动模块。单个模块失败只记录警告。
struct SystemActivator {
    registry: Weak<ModuleRegistry>,
}

#[async_trait]
impl ModuleActivator for SystemActivator {
    async fn start(&self, _context: &ExecutionContext) -> anyhow::Result<()> {
        let Some(registry) = self.registry.upgrade() else {
            return Ok(());
        };

        for controller in registry.by_start_level(false) {
            let settings = controller.settings();
            if !settings.contains(ModuleSettings::AUTO_START) {
                continue;
            }
            let mut options = StartOptions::TRANSIENT;
            if settings.contains(ModuleSettings::USE_ACTIVATION_POLICY) {
                options |= StartOptions::USE_ACTIVATION_POLICY;
            }
            if let Err(e) = controller.start(options).await {
                warn!(module_id = controller.id(), error = %e, "自动启动模块失败");
            }
        }
        Ok(())
    }

    async fn stop(&self, _context: &ExecutionContext) -> anyhow::Result<()> {
        let Some(registry) = self.registry.upgrade() else {
            return Ok(());
        };

        for controller in registry.by_start_level(true) {
            if !controller.state().is_active_set() {
                continue;
            }
            if let Err(e) = controller.stop(StopOptions::TRANSIENT).await {
                warn!(module_id = controller.id(), error = %e, "停止模块失败");
            }
        }
        Ok(())
    }
}

/// 框架根对象
///
/// 没有进程级单例：每个 `Framework` 独立构造，按引用传递。
///
/// # 生命周期
///
/// 1. `new()` - 创建框架，系统模块处于 `INSTALLED`
/// 2. `install()` - 安装模块
/// 3. `start()` - 启动系统模块，随后自动启动模块
/// 4. `stop()` / `wait_for_stop()` - 在后台停止并等待
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use bundle_core::{Framework, FrameworkConfig, MemoryContentStore, ModuleContent, StartOptions};
/// use semver::Version;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = Arc::new(MemoryContentStore::new());
///     store.stage("mem:hello", ModuleContent::new("org.example.hello", Version::new(1, 0, 0)));
///
///     let framework = Framework::new(FrameworkConfig::default(), store)?;
///     let module = framework.install("mem:hello").await?;
///     module.start(StartOptions::empty()).await?;
///
///     framework.start().await?;
///     framework.stop().await?;
///     framework.wait_for_stop(Duration::ZERO).await;
///     Ok(())
/// }
/// ```
pub struct Framework {
    config: FrameworkConfig,
    services: Arc<FrameworkServices>,
    registry: Arc<ModuleRegistry>,
    system: Arc<ModuleLifecycleController>,
    broadcast: Option<Arc<BroadcastEventPublisher>>,
}

impl Framework {
    /// 使用默认协作者创建框架，生命周期事件通过广播通道发布
    pub fn new(config: FrameworkConfig, content: Arc<dyn ContentStore>) -> Result<Self> {
        let broadcast = Arc::new(BroadcastEventPublisher::new(
            config.lifecycle.event_capacity,
        ));
        let services = FrameworkServices::new(content)
            .with_config(&config)
            .with_events(broadcast.clone());

        let mut framework = Self::with_services(config, services)?;
        framework.broadcast = Some(broadcast);
        Ok(framework)
    }

    /// 使用给定的协作者创建框架
    ///
    /// `services` 中的生命周期与解析配置保持调用方设置的值。
    pub fn with_services(config: FrameworkConfig, services: FrameworkServices) -> Result<Self> {
        info!("初始化模块框架 v{}", crate::VERSION);
        if config.dev_mode {
            debug!(config = ?config, "开发模式");
        }

        let services = Arc::new(services);
        let registry = Arc::new(ModuleRegistry::new());

        let version = Version::parse(crate::VERSION)
            .map_err(|e| CoreError::InitFailed(format!("无效的框架版本: {}", e)))?;
        let content = ModuleContent::new(SYSTEM_SYMBOLIC_NAME, version);
        let provider = Arc::new(MapSymbolProvider::new(SYSTEM_MODULE_ID, 0, &content));
        let generation = Arc::new(Generation::new(SYSTEM_MODULE_ID, 0, &content, provider));

        let system = Arc::new(ModuleLifecycleController::new(
            ModuleDescriptor::new(SYSTEM_MODULE_ID, SYSTEM_MODULE_LOCATION, 0),
            generation,
            Arc::new(SystemActivator {
                registry: Arc::downgrade(&registry),
            }),
            services.clone(),
        ));
        registry.insert(system.clone());

        debug!("系统模块已注册");
        Ok(Self {
            config,
            services,
            registry,
            system,
            broadcast: None,
        })
    }

    // ==================== 框架生命周期 ====================

    /// 启动框架
    ///
    /// 启动系统模块；系统模块的激活器再自动启动其余模块。
    pub async fn start(&self) -> Result<()> {
        info!("启动模块框架...");
        self.system.start(StartOptions::empty()).await?;
        info!(modules = self.registry.count(), "模块框架已启动");
        Ok(())
    }

    /// 在后台停止框架
    ///
    /// 框架未启动时返回 `None`。
    pub async fn stop(&self) -> Result<Option<JoinHandle<()>>> {
        info!("正在停止模块框架...");
        self.system.async_stop(StopOptions::empty()).await
    }

    /// 在后台重启框架
    pub async fn update(&self) -> Result<Option<JoinHandle<()>>> {
        info!("正在重启模块框架...");
        self.system.async_update(None).await
    }

    /// 等待框架停止，语义同 [`ModuleLifecycleController::wait_for_stop`]
    pub async fn wait_for_stop(&self, timeout: Duration) -> StopOutcome {
        self.system.wait_for_stop(timeout).await
    }

    // ==================== 模块管理 ====================

    /// 安装模块，使用空激活器
    pub async fn install(&self, location: &str) -> Result<Arc<ModuleLifecycleController>> {
        self.install_with(location, Arc::new(NoopActivator)).await
    }

    /// 安装模块
    ///
    /// # Errors
    ///
    /// - 位置已安装：[`CoreError::DuplicateLocation`]
    /// - 内容无法读取：[`CoreError::ContentRead`]
    pub async fn install_with(
        &self,
        location: &str,
        activator: Arc<dyn ModuleActivator>,
    ) -> Result<Arc<ModuleLifecycleController>> {
        let id = self.registry.reserve(location)?;
        let descriptor =
            ModuleDescriptor::new(id, location, self.config.lifecycle.default_start_level);

        let generation = match self.services.content.read_generation(&descriptor).await {
            Ok(generation) => generation,
            Err(source) => {
                self.registry.cancel(location);
                warn!(module_id = id, location, error = %source, "安装失败");
                return Err(CoreError::ContentRead { module: id, source });
            }
        };

        let controller = Arc::new(ModuleLifecycleController::new(
            descriptor,
            generation,
            activator,
            self.services.clone(),
        ));
        self.registry.insert(controller.clone());
        self.services
            .events
            .publish(LifecycleEventKind::Installed, id, None);

        info!(module_id = id, location, "模块已安装");
        Ok(controller)
    }

    /// 卸载模块并从注册表移除
    pub async fn uninstall(&self, id: ModuleId) -> Result<()> {
        let controller = self.get(id).ok_or(CoreError::ModuleNotFound(id))?;
        controller.uninstall().await?;
        self.registry.remove(id);
        Ok(())
    }

    /// 按 ID 获取模块
    pub fn get(&self, id: ModuleId) -> Option<Arc<ModuleLifecycleController>> {
        self.registry.get(id)
    }

    /// 按安装位置获取模块
    pub fn get_by_location(&self, location: &str) -> Option<Arc<ModuleLifecycleController>> {
        self.registry.get_by_location(location)
    }

    /// 全部模块（包括系统模块），按 ID 升序
    pub fn modules(&self) -> Vec<Arc<ModuleLifecycleController>> {
        self.registry.modules()
    }

    /// 系统模块
    pub fn system_module(&self) -> &Arc<ModuleLifecycleController> {
        &self.system
    }

    // ==================== 访问器 ====================

    /// 订阅生命周期事件
    ///
    /// 只有通过 [`Framework::new`] 创建时才有广播通道。
    pub fn subscribe(&self) -> Option<broadcast::Receiver<LifecycleEvent>> {
        self.broadcast.as_ref().map(|b| b.subscribe())
    }

    /// 框架配置
    pub fn config(&self) -> &FrameworkConfig {
        &self.config
    }

    /// 共享的协作者
    pub fn services(&self) -> &Arc<FrameworkServices> {
        &self.services
    }
}

impl Drop for Framework {
    fn drop(&mut self) {
        debug!("模块框架实例被释放");
    }
}
