//! 模块生命周期控制器
//!
//! 每个模块一个控制器，负责状态机转换、执行上下文以及模块级别的符号查找。
//!
//! # 锁
//!
//! - 转换锁（`tokio::sync::Mutex`）：同一模块的所有转换互斥，守卫离开作用域即释放
//! - 上下文监视器（`parking_lot::Mutex`）：只保护执行上下文的创建与销毁，
//!   查询上下文不会与转换争用
//! - 当前代放在读写锁后面，符号查找只读不等待转换
//!
//! 不同模块的控制器之间没有全局串行化。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use semver::Version;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use super::buddy::{DelegationPolicy, DependentPolicy, RegisteredPolicy};
use super::content::ContentStore;
use super::dependency::{DependencyGraph, WiringGraph};
use super::events::{EventPublisher, LifecycleEventKind, NoopEventPublisher};
use super::generation::{Generation, ModuleContent, Resource, Symbol};
use super::metadata::{
    ModuleDescriptor, ModuleId, ModuleSettings, ModuleState, StartOptions, StopOptions,
    Transition,
};
use super::runtime::{ExecutionContext, ModuleActivator};
use super::security::{AdminAction, AllowAllPermissions, PermissionChecker};
use crate::core::config::{DelegationKind, FrameworkConfig, LifecycleConfig, ResolverConfig};
use crate::utils::{CoreError, Result};

/// 控制器共享的协作者与配置
pub struct FrameworkServices {
    /// 内容存储
    pub content: Arc<dyn ContentStore>,
    /// 依赖图
    pub graph: Arc<dyn DependencyGraph>,
    /// 事件发布
    pub events: Arc<dyn EventPublisher>,
    /// 权限检查
    pub permissions: Arc<dyn PermissionChecker>,
    /// 生命周期配置
    pub lifecycle: LifecycleConfig,
    /// 符号解析配置
    pub resolver: ResolverConfig,
}

impl FrameworkServices {
    /// 使用默认协作者创建：内存连线图、不发布事件、允许全部操作
    pub fn new(content: Arc<dyn ContentStore>) -> Self {
        Self {
            content,
            graph: Arc::new(WiringGraph::new()),
            events: Arc::new(NoopEventPublisher),
            permissions: Arc::new(AllowAllPermissions),
            lifecycle: LifecycleConfig::default(),
            resolver: ResolverConfig::default(),
        }
    }

    /// 替换依赖图
    pub fn with_graph(mut self, graph: Arc<dyn DependencyGraph>) -> Self {
        self.graph = graph;
        self
    }

    /// 替换事件发布器
    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = events;
        self
    }

    /// 替换权限检查
    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionChecker>) -> Self {
        self.permissions = permissions;
        self
    }

    /// 应用框架配置
    pub fn with_config(mut self, config: &FrameworkConfig) -> Self {
        self.lifecycle = config.lifecycle.clone();
        self.resolver = config.resolver.clone();
        self
    }
}

/// `wait_for_stop` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// 模块已停止
    Stopped,
    /// 模块因更新而停止
    StoppedUpdate,
    /// 等待超时
    TimedOut,
}

#[derive(Debug, Clone, Copy)]
struct StopSignal {
    seq: u64,
    outcome: StopOutcome,
}

/// 转换锁保护的数据
#[derive(Default)]
struct Generations {
    /// 被替换下来、尚未释放的代
    retained: Vec<Arc<Generation>>,
}

/// 模块生命周期控制器
pub struct ModuleLifecycleController {
    id: ModuleId,
    descriptor: Mutex<ModuleDescriptor>,
    state: RwLock<ModuleState>,
    current: RwLock<Arc<Generation>>,
    transition: tokio::sync::Mutex<Generations>,
    context: Mutex<Option<Arc<ExecutionContext>>>,
    policy: Mutex<Option<Arc<dyn DelegationPolicy>>>,
    stop_tx: watch::Sender<StopSignal>,
    async_in_flight: AtomicUsize,
    activator: Arc<dyn ModuleActivator>,
    services: Arc<FrameworkServices>,
}

impl std::fmt::Debug for ModuleLifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLifecycleController")
            .field("id", &self.id)
            .field("state", &*self.state.read())
            .finish_non_exhaustive()
    }
}

impl ModuleLifecycleController {
    /// 创建控制器，模块处于 `INSTALLED`
    ///
    /// 第一个代会登记到依赖图。
    pub fn new(
        descriptor: ModuleDescriptor,
        generation: Arc<Generation>,
        activator: Arc<dyn ModuleActivator>,
        services: Arc<FrameworkServices>,
    ) -> Self {
        services.graph.register(&generation);
        let (stop_tx, _) = watch::channel(StopSignal {
            seq: 0,
            outcome: StopOutcome::Stopped,
        });

        Self {
            id: descriptor.id,
            descriptor: Mutex::new(descriptor),
            state: RwLock::new(ModuleState::Installed),
            current: RwLock::new(generation),
            transition: tokio::sync::Mutex::new(Generations::default()),
            context: Mutex::new(None),
            policy: Mutex::new(None),
            stop_tx,
            async_in_flight: AtomicUsize::new(0),
            activator,
            services,
        }
    }

    // ==================== 访问器 ====================

    /// 模块 ID
    pub fn id(&self) -> ModuleId {
        self.id
    }

    /// 安装位置
    pub fn location(&self) -> String {
        self.descriptor.lock().location.clone()
    }

    /// 当前状态
    pub fn state(&self) -> ModuleState {
        *self.state.read()
    }

    /// 是否为系统模块
    pub fn is_system(&self) -> bool {
        self.descriptor.lock().is_system()
    }

    /// 描述信息快照
    pub fn descriptor(&self) -> ModuleDescriptor {
        self.descriptor.lock().clone()
    }

    /// 持久化设置
    pub fn settings(&self) -> ModuleSettings {
        self.descriptor.lock().settings
    }

    /// 启动级别
    pub fn start_level(&self) -> i32 {
        self.descriptor.lock().start_level
    }

    /// 修改启动级别，只影响之后的框架启动
    pub fn set_start_level(&self, level: i32) {
        self.descriptor.lock().start_level = level;
    }

    /// 当前代
    pub fn current_generation(&self) -> Arc<Generation> {
        self.current.read().clone()
    }

    /// 全部代的数量（当前代加上保留的旧代）
    pub async fn generation_count(&self) -> usize {
        self.transition.lock().await.retained.len() + 1
    }

    /// 符号名，无权读取元数据时为 `None`
    pub fn symbolic_name(&self) -> Option<String> {
        self.check_read(AdminAction::Metadata)
            .then(|| self.current_generation().symbolic_name().to_string())
    }

    /// 版本，无权读取元数据时为 `None`
    pub fn version(&self) -> Option<Version> {
        self.check_read(AdminAction::Metadata)
            .then(|| self.current_generation().version().clone())
    }

    /// 正在执行的后台停止/更新任务数量
    pub fn async_in_flight(&self) -> usize {
        self.async_in_flight.load(Ordering::SeqCst)
    }

    // ==================== 执行上下文 ====================

    /// 获取执行上下文
    ///
    /// 只在活动集合内存在；无权获取时为 `None`。
    pub fn context(&self) -> Option<Arc<ExecutionContext>> {
        if !self.check_read(AdminAction::Context) {
            return None;
        }
        self.create_context()
    }

    /// 在监视器下创建（或返回已有的）执行上下文
    fn create_context(&self) -> Option<Arc<ExecutionContext>> {
        let mut slot = self.context.lock();
        if slot.is_none() && self.state().is_active_set() {
            debug!(module_id = self.id, "创建执行上下文");
            *slot = Some(Arc::new(ExecutionContext::new(self.id)));
        }
        slot.clone()
    }

    fn discard_context(&self) -> Option<Arc<ExecutionContext>> {
        self.context.lock().take()
    }

    // ==================== 生命周期操作 ====================

    /// 解析当前代
    ///
    /// 已解析时直接返回。
    pub async fn resolve(&self) -> Result<()> {
        let _held = self.transition.lock().await;
        self.resolve_locked()
    }

    fn resolve_locked(&self) -> Result<()> {
        match self.state() {
            ModuleState::Uninstalled => Err(self.uninstalled("resolve")),
            ModuleState::Installed => {
                let generation = self.current_generation();
                let report = self.services.graph.resolve(&[generation.clone()]);
                if !report.is_resolved(generation.revision()) {
                    return Err(CoreError::Resolve {
                        module: self.id,
                        report: report.to_string(),
                    });
                }
                self.transition_to(Transition::Resolve)?;
                self.reset_policy();
                self.publish(LifecycleEventKind::Resolved, None);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// 启动模块
    ///
    /// `INSTALLED` 时先隐式解析。带 `USE_ACTIVATION_POLICY` 且当前代声明了
    /// 延迟激活时进入 `LAZY_STARTING`，否则激活到 `ACTIVE`。
    pub async fn start(&self, options: StartOptions) -> Result<()> {
        self.services.permissions.check(self.id, AdminAction::Execute)?;
        let options = options.difference(StartOptions::LAZY_TRIGGER);

        let _held = self.transition.lock().await;
        self.start_locked(options)
            .instrument(crate::module_span!(self.id, "start"))
            .await
    }

    async fn start_locked(&self, options: StartOptions) -> Result<()> {
        let state = self.state();
        if state.is_terminal() {
            return Err(self.uninstalled("start"));
        }
        if !options.intersects(StartOptions::TRANSIENT | StartOptions::LAZY_TRIGGER) {
            self.persist_start(options);
        }

        match state {
            ModuleState::Active | ModuleState::Starting => return Ok(()),
            ModuleState::Stopping => {
                return Err(CoreError::IllegalState(format!(
                    "模块 {} 正在停止，不能启动",
                    self.id
                )));
            }
            ModuleState::LazyStarting => {
                if options.contains(StartOptions::LAZY_TRIGGER)
                    || !options.contains(StartOptions::USE_ACTIVATION_POLICY)
                {
                    return self.activate().await;
                }
                return Ok(());
            }
            ModuleState::Installed => self.resolve_locked()?,
            ModuleState::Resolved | ModuleState::Uninstalled => {}
        }

        if options.contains(StartOptions::USE_ACTIVATION_POLICY)
            && self.current_generation().lazy_activation()
        {
            self.transition_to(Transition::LazyStart)?;
            self.create_context();
            self.publish(LifecycleEventKind::LazyActivation, None);
            return Ok(());
        }

        self.activate().await
    }

    /// 从 `RESOLVED` 或 `LAZY_STARTING` 激活
    async fn activate(&self) -> Result<()> {
        self.transition_to(Transition::Start)?;
        self.publish(LifecycleEventKind::Starting, None);

        let context = self.create_context().ok_or_else(|| {
            CoreError::IllegalState(format!("模块 {} 在活动集合内却没有执行上下文", self.id))
        })?;

        match self.run_activator(true, &context).await {
            Ok(()) => {
                self.transition_to(Transition::Activated)?;
                self.publish(LifecycleEventKind::Started, None);
                Ok(())
            }
            Err(e) => {
                if let Some(context) = self.discard_context() {
                    context.close();
                }
                self.transition_to(Transition::Deactivated)?;
                let err = CoreError::activation(self.id, e);
                error!(module_id = self.id, error = %err, "模块激活失败");
                self.publish(LifecycleEventKind::Error, Some(err.to_string()));
                self.signal_stop(StopOutcome::Stopped);
                Err(err)
            }
        }
    }

    /// 调用激活器回调，配置了超时时受其限制
    async fn run_activator(&self, starting: bool, context: &ExecutionContext) -> anyhow::Result<()> {
        let callback = async {
            if starting {
                self.activator.start(context).await
            } else {
                self.activator.stop(context).await
            }
        };

        match self.services.lifecycle.activation_timeout() {
            Some(limit) => tokio::time::timeout(limit, callback)
                .await
                .map_err(|_| anyhow::anyhow!("激活器回调超过 {} 毫秒未完成", limit.as_millis()))?,
            None => callback.await,
        }
    }

    /// 停止模块
    ///
    /// 不在活动集合内时什么也不做。
    pub async fn stop(&self, options: StopOptions) -> Result<()> {
        self.services.permissions.check(self.id, AdminAction::Execute)?;

        let _held = self.transition.lock().await;
        self.stop_locked(options)
            .instrument(crate::module_span!(self.id, "stop"))
            .await
    }

    async fn stop_locked(&self, options: StopOptions) -> Result<()> {
        let state = self.state();
        if state.is_terminal() {
            return Err(self.uninstalled("stop"));
        }
        if !options.contains(StopOptions::TRANSIENT) {
            self.persist_stop();
        }
        if !state.is_active_set() {
            return Ok(());
        }
        self.deactivate(StopOutcome::Stopped).await
    }

    /// 停用：首先丢弃执行上下文，回调失败时仍然回到 `RESOLVED`
    async fn deactivate(&self, reason: StopOutcome) -> Result<()> {
        let context = self.discard_context();

        if self.state() == ModuleState::LazyStarting {
            if let Some(context) = context {
                context.close();
            }
            self.transition_to(Transition::Deactivated)?;
            self.publish(LifecycleEventKind::Stopped, None);
            self.signal_stop(reason);
            return Ok(());
        }

        self.transition_to(Transition::Stop)?;
        self.publish(LifecycleEventKind::Stopping, None);

        let result = match &context {
            Some(context) => self.run_activator(false, context).await,
            None => Ok(()),
        };
        if let Some(context) = context {
            context.close();
        }

        self.transition_to(Transition::Deactivated)?;
        self.publish(LifecycleEventKind::Stopped, None);
        self.signal_stop(reason);

        result.map_err(|e| {
            let err = CoreError::activation(self.id, e);
            warn!(module_id = self.id, error = %err, "停止回调失败");
            self.publish(LifecycleEventKind::Error, Some(err.to_string()));
            err
        })
    }

    /// 更新模块
    ///
    /// `content` 为 `None` 时从安装位置重新读取。活动模块在同一个转换锁下
    /// 先停止、替换、再按原来的方式重新启动。
    pub async fn update(&self, content: Option<ModuleContent>) -> Result<()> {
        self.services.permissions.check(self.id, AdminAction::Lifecycle)?;

        let mut generations = self.transition.lock().await;
        self.update_locked(&mut generations, content)
            .instrument(crate::module_span!(self.id, "update"))
            .await
    }

    async fn update_locked(
        &self,
        generations: &mut Generations,
        content: Option<ModuleContent>,
    ) -> Result<()> {
        let state = self.state();
        if state.is_terminal() {
            return Err(self.uninstalled("update"));
        }

        // 系统模块没有可替换的内容，更新即重启
        let replacement = if self.is_system() {
            None
        } else {
            let descriptor = self.descriptor();
            let generation = self
                .services
                .content
                .replace_generation(&descriptor, content)
                .await
                .map_err(|source| CoreError::ContentRead {
                    module: self.id,
                    source,
                })?;
            Some(generation)
        };

        let restart = match state {
            ModuleState::LazyStarting => {
                Some(StartOptions::TRANSIENT | StartOptions::USE_ACTIVATION_POLICY)
            }
            s if s.is_active_set() => Some(StartOptions::TRANSIENT),
            _ => None,
        };

        if restart.is_some() {
            if let Err(e) = self.deactivate(StopOutcome::StoppedUpdate).await {
                warn!(module_id = self.id, error = %e, "更新前停止失败，继续更新");
            }
        }

        if let Some(generation) = replacement {
            let was_resolved = self.state() == ModuleState::Resolved;
            self.transition_to(Transition::Update)?;
            if was_resolved {
                self.publish(LifecycleEventKind::Unresolved, None);
            }

            let previous = std::mem::replace(&mut *self.current.write(), generation.clone());
            self.services.graph.unregister(&previous);
            self.services.graph.register(&generation);
            generations.retained.push(previous);
            self.reset_policy();
            info!(
                module_id = self.id,
                revision = generation.revision(),
                "已替换当前代"
            );
        }
        self.publish(LifecycleEventKind::Updated, None);

        if let Some(options) = restart {
            self.start_locked(options).await?;
        }
        Ok(())
    }

    /// 卸载模块
    ///
    /// 活动模块先被强制停止；停止失败只发布错误事件，卸载照常完成。
    pub async fn uninstall(&self) -> Result<()> {
        self.services.permissions.check(self.id, AdminAction::Lifecycle)?;
        if self.is_system() {
            return Err(CoreError::invalid_operation("系统模块不能卸载"));
        }

        let mut generations = self.transition.lock().await;
        let state = self.state();
        if state.is_terminal() {
            return Err(self.uninstalled("uninstall"));
        }

        if state.is_active_set() {
            if let Err(e) = self.deactivate(StopOutcome::Stopped).await {
                warn!(module_id = self.id, error = %e, "卸载前停止失败");
            }
        }

        self.transition_to(Transition::Uninstall)?;
        self.reset_policy();

        let current = self.current_generation();
        self.services.graph.unregister(&current);
        self.services.content.release_generation(&current);
        for retained in generations.retained.drain(..) {
            self.services.content.release_generation(&retained);
        }

        self.publish(LifecycleEventKind::Uninstalled, None);
        Ok(())
    }

    /// 释放更新后保留的旧代，返回释放的数量
    pub async fn release_retained(&self) -> usize {
        let mut generations = self.transition.lock().await;
        let count = generations.retained.len();
        for retained in generations.retained.drain(..) {
            self.services.content.release_generation(&retained);
        }
        count
    }

    // ==================== 异步操作 ====================

    /// 异步停止
    ///
    /// 只在持有转换锁期间检查活动集合，然后把同步停止交给后台任务并立即返回。
    /// 不在活动集合内时返回 `None`。两个重叠的调用可能各自派生一个任务；
    /// 后一个任务看到模块已停止，什么也不做。
    pub async fn async_stop(self: &Arc<Self>, options: StopOptions) -> Result<Option<JoinHandle<()>>> {
        self.services.permissions.check(self.id, AdminAction::Execute)?;
        if !self.check_async_candidate("stop").await? {
            return Ok(None);
        }

        let controller = Arc::clone(self);
        self.async_in_flight.fetch_add(1, Ordering::SeqCst);
        let span = crate::module_span!(self.id, "async_stop");
        let handle = tokio::spawn(
            async move {
                if let Err(e) = controller.stop(options).await {
                    error!(module_id = controller.id, error = %e, "后台停止失败");
                    controller.publish(LifecycleEventKind::Error, Some(e.to_string()));
                }
                controller.async_in_flight.fetch_sub(1, Ordering::SeqCst);
            }
            .instrument(span),
        );
        Ok(Some(handle))
    }

    /// 异步更新，语义同 [`Self::async_stop`]
    pub async fn async_update(
        self: &Arc<Self>,
        content: Option<ModuleContent>,
    ) -> Result<Option<JoinHandle<()>>> {
        self.services.permissions.check(self.id, AdminAction::Lifecycle)?;
        if !self.check_async_candidate("update").await? {
            return Ok(None);
        }

        let controller = Arc::clone(self);
        self.async_in_flight.fetch_add(1, Ordering::SeqCst);
        let span = crate::module_span!(self.id, "async_update");
        let handle = tokio::spawn(
            async move {
                if let Err(e) = controller.update(content).await {
                    error!(module_id = controller.id, error = %e, "后台更新失败");
                    controller.publish(LifecycleEventKind::Error, Some(e.to_string()));
                }
                controller.async_in_flight.fetch_sub(1, Ordering::SeqCst);
            }
            .instrument(span),
        );
        Ok(Some(handle))
    }

    /// 持有转换锁检查模块是否在活动集合内，检查完立即释放
    async fn check_async_candidate(&self, operation: &str) -> Result<bool> {
        let _held = self.transition.lock().await;
        let state = self.state();
        if state.is_terminal() {
            return Err(self.uninstalled(operation));
        }
        Ok(state.is_active_set())
    }

    /// 等待模块停止
    ///
    /// 不在活动集合内时立即返回上一次停止的原因。`timeout` 为零表示无限等待。
    pub async fn wait_for_stop(&self, timeout: Duration) -> StopOutcome {
        let mut rx = self.stop_tx.subscribe();
        if !self.state().is_active_set() {
            let last = rx.borrow().outcome;
            return last;
        }

        let wait = async move {
            if rx.changed().await.is_err() {
                return StopOutcome::Stopped;
            }
            let signal = *rx.borrow();
            signal.outcome
        };

        if timeout.is_zero() {
            wait.await
        } else {
            tokio::time::timeout(timeout, wait)
                .await
                .unwrap_or(StopOutcome::TimedOut)
        }
    }

    // ==================== 符号查找 ====================

    /// 查找符号：先查本地内容，再按委托策略查依赖方
    ///
    /// 无权查找时返回 `None`。`INSTALLED` 的模块先隐式解析，失败时发布错误事件。
    /// 查找失败且模块处于 `LAZY_STARTING` 时触发完整激活。
    pub async fn find_symbol(&self, name: &str) -> Result<Option<Symbol>> {
        if !self.check_read(AdminAction::Class) {
            return Ok(None);
        }
        self.ensure_valid("find_symbol")?;
        if !self.ensure_resolved(true).await {
            return Ok(None);
        }

        let found = self
            .current_generation()
            .provider()
            .find_symbol(name)
            .or_else(|| self.policy().and_then(|policy| policy.resolve_symbol(name)));
        debug!(module_id = self.id, symbol = name, found = found.is_some(), "符号查找");

        if found.is_none() && self.state() == ModuleState::LazyStarting {
            if let Err(e) = self.trigger_lazy_activation().await {
                warn!(module_id = self.id, error = %e, "延迟激活失败");
            }
        }
        Ok(found)
    }

    /// 查找单个资源
    ///
    /// 无法解析时只查本地内容。
    pub async fn get_resource(&self, name: &str) -> Result<Option<Resource>> {
        if !self.check_read(AdminAction::Resource) {
            return Ok(None);
        }
        self.ensure_valid("get_resource")?;
        let resolved = self.ensure_resolved(false).await;

        let local = self.current_generation().provider().find_resource(name);
        if local.is_some() || !resolved {
            return Ok(local);
        }
        Ok(self.policy().and_then(|policy| policy.resolve_resource(name)))
    }

    /// 查找全部同名资源：本地资源在前，依赖方资源按策略顺序在后
    pub async fn get_resources(&self, name: &str) -> Result<Vec<Resource>> {
        if !self.check_read(AdminAction::Resource) {
            return Ok(vec![]);
        }
        self.ensure_valid("get_resources")?;
        let resolved = self.ensure_resolved(false).await;

        let mut result = self
            .current_generation()
            .provider()
            .find_resources(name)
            .map_err(|source| CoreError::ContentRead {
                module: self.id,
                source,
            })?;
        if resolved {
            if let Some(policy) = self.policy() {
                result.extend(policy.resolve_resource_list(name));
            }
        }
        Ok(result)
    }

    async fn trigger_lazy_activation(&self) -> Result<()> {
        let _held = self.transition.lock().await;
        if self.state() != ModuleState::LazyStarting {
            return Ok(());
        }
        info!(module_id = self.id, "查找失败触发延迟激活");
        self.start_locked(StartOptions::LAZY_TRIGGER).await
    }

    async fn ensure_resolved(&self, report_error: bool) -> bool {
        if self.state() != ModuleState::Installed {
            return true;
        }
        match self.resolve().await {
            Ok(()) => true,
            Err(e) => {
                if report_error {
                    warn!(module_id = self.id, error = %e, "隐式解析失败");
                    self.publish(LifecycleEventKind::Error, Some(e.to_string()));
                }
                false
            }
        }
    }

    /// 当前代的委托策略，首次使用时构造
    fn policy(&self) -> Option<Arc<dyn DelegationPolicy>> {
        if !self.services.resolver.buddy_delegation {
            return None;
        }
        let mut slot = self.policy.lock();
        if slot.is_none() {
            let generation = self.current_generation();
            let policy: Arc<dyn DelegationPolicy> = match self.services.resolver.policy {
                DelegationKind::Registered => Arc::new(RegisteredPolicy::new(
                    &generation,
                    self.services.graph.as_ref(),
                )),
                DelegationKind::Dependent => Arc::new(DependentPolicy::new(
                    &generation,
                    self.services.graph.clone(),
                )),
            };
            *slot = Some(policy);
        }
        slot.clone()
    }

    fn reset_policy(&self) {
        self.policy.lock().take();
    }

    // ==================== 内部工具 ====================

    fn transition_to(&self, event: Transition) -> Result<ModuleState> {
        let (from, to) = {
            let mut state = self.state.write();
            let from = *state;
            let to = from.next(event).ok_or_else(|| {
                CoreError::IllegalState(format!(
                    "模块 {} 不能在 {} 状态执行 {:?}",
                    self.id, from, event
                ))
            })?;
            *state = to;
            (from, to)
        };
        info!(module_id = self.id, from = %from, to = %to, "状态转换");
        Ok(to)
    }

    fn persist_start(&self, options: StartOptions) {
        let mut descriptor = self.descriptor.lock();
        descriptor.settings.insert(ModuleSettings::AUTO_START);
        descriptor.settings.set(
            ModuleSettings::USE_ACTIVATION_POLICY,
            options.contains(StartOptions::USE_ACTIVATION_POLICY),
        );
        if self.services.lifecycle.monitor_activation {
            debug!(module_id = self.id, options = ?options, "持久化启动请求");
        }
    }

    fn persist_stop(&self) {
        let mut descriptor = self.descriptor.lock();
        descriptor
            .settings
            .remove(ModuleSettings::AUTO_START | ModuleSettings::USE_ACTIVATION_POLICY);
        if self.services.lifecycle.monitor_activation {
            debug!(module_id = self.id, "持久化停止请求");
        }
    }

    fn signal_stop(&self, outcome: StopOutcome) {
        let seq = self.stop_tx.borrow().seq + 1;
        self.stop_tx.send_replace(StopSignal { seq, outcome });
    }

    fn publish(&self, kind: LifecycleEventKind, cause: Option<String>) {
        self.services.events.publish(kind, self.id, cause);
    }

    /// 读取类操作的权限检查，拒绝时恢复为默认值
    fn check_read(&self, action: AdminAction) -> bool {
        match self.services.permissions.check(self.id, action) {
            Ok(()) => true,
            Err(e) => {
                debug!(module_id = self.id, action = ?action, error = %e, "权限不足，返回默认值");
                false
            }
        }
    }

    fn ensure_valid(&self, operation: &str) -> Result<()> {
        if self.state().is_terminal() {
            return Err(self.uninstalled(operation));
        }
        Ok(())
    }

    fn uninstalled(&self, operation: &str) -> CoreError {
        CoreError::invalid_operation(format!("模块 {} 已卸载，不能执行 {}", self.id, operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::content::MemoryContentStore;
    use crate::module::runtime::NoopActivator;
    use std::sync::atomic::AtomicBool;

    struct FlakyActivator {
        fail_start: AtomicBool,
        fail_stop: AtomicBool,
    }

    #[async_trait::async_trait]
    impl ModuleActivator for FlakyActivator {
        async fn start(&self, _context: &ExecutionContext) -> anyhow::Result<()> {
            if self.fail_start.load(Ordering::SeqCst) {
                anyhow::bail!("start failed");
            }
            Ok(())
        }

        async fn stop(&self, _context: &ExecutionContext) -> anyhow::Result<()> {
            if self.fail_stop.load(Ordering::SeqCst) {
                anyhow::bail!("stop failed");
            }
            Ok(())
        }
    }

    async fn controller_with(
        content: ModuleContent,
        activator: Arc<dyn ModuleActivator>,
    ) -> Arc<ModuleLifecycleController> {
        let store = Arc::new(MemoryContentStore::new());
        store.stage("mem:test", content);
        let descriptor = ModuleDescriptor::new(1, "mem:test", 1);
        let generation = store.read_generation(&descriptor).await.unwrap();
        let services = Arc::new(FrameworkServices::new(store));
        Arc::new(ModuleLifecycleController::new(
            descriptor, generation, activator, services,
        ))
    }

    fn content() -> ModuleContent {
        ModuleContent::new("org.example.test", Version::new(1, 0, 0))
    }

    // ==================== 状态机测试 ====================

    #[tokio::test]
    async fn test_start_stop() {
        let controller = controller_with(content(), Arc::new(NoopActivator)).await;
        assert_eq!(controller.state(), ModuleState::Installed);
        assert!(controller.context().is_none());

        controller.start(StartOptions::empty()).await.unwrap();
        assert_eq!(controller.state(), ModuleState::Active);
        assert!(controller.context().is_some());
        assert!(controller.settings().contains(ModuleSettings::AUTO_START));

        controller.stop(StopOptions::empty()).await.unwrap();
        assert_eq!(controller.state(), ModuleState::Resolved);
        assert!(controller.context().is_none());
        assert!(!controller.settings().contains(ModuleSettings::AUTO_START));
    }

    #[tokio::test]
    async fn test_transient_start_keeps_settings() {
        let controller = controller_with(content(), Arc::new(NoopActivator)).await;
        controller.start(StartOptions::TRANSIENT).await.unwrap();
        assert!(controller.settings().is_empty());
    }

    #[tokio::test]
    async fn test_activation_failure_rolls_back() {
        let activator = Arc::new(FlakyActivator {
            fail_start: AtomicBool::new(true),
            fail_stop: AtomicBool::new(false),
        });
        let controller = controller_with(content(), activator).await;

        let err = controller.start(StartOptions::empty()).await.unwrap_err();
        assert!(matches!(err, CoreError::Activation { module: 1, .. }));
        assert_eq!(controller.state(), ModuleState::Resolved);
        assert!(controller.context().is_none());
    }

    #[tokio::test]
    async fn test_stop_failure_still_discards_context() {
        let activator = Arc::new(FlakyActivator {
            fail_start: AtomicBool::new(false),
            fail_stop: AtomicBool::new(true),
        });
        let controller = controller_with(content(), activator).await;
        controller.start(StartOptions::empty()).await.unwrap();
        let context = controller.context().unwrap();

        let err = controller.stop(StopOptions::empty()).await.unwrap_err();
        assert!(matches!(err, CoreError::Activation { .. }));
        assert_eq!(controller.state(), ModuleState::Resolved);
        assert!(!context.is_valid());
        assert!(controller.context().is_none());
    }

    #[tokio::test]
    async fn test_lazy_start() {
        let controller = controller_with(content().lazy(), Arc::new(NoopActivator)).await;
        controller
            .start(StartOptions::USE_ACTIVATION_POLICY)
            .await
            .unwrap();
        assert_eq!(controller.state(), ModuleState::LazyStarting);
        assert!(controller.context().is_some());
        assert!(controller
            .settings()
            .contains(ModuleSettings::AUTO_START | ModuleSettings::USE_ACTIVATION_POLICY));

        // 查找失败触发激活
        assert!(controller.find_symbol("org.example.Missing").await.unwrap().is_none());
        assert_eq!(controller.state(), ModuleState::Active);
    }

    #[tokio::test]
    async fn test_stop_lazy_starting() {
        let controller = controller_with(content().lazy(), Arc::new(NoopActivator)).await;
        controller
            .start(StartOptions::USE_ACTIVATION_POLICY)
            .await
            .unwrap();
        controller.stop(StopOptions::TRANSIENT).await.unwrap();
        assert_eq!(controller.state(), ModuleState::Resolved);
        assert!(controller.context().is_none());
    }

    #[tokio::test]
    async fn test_activation_timeout() {
        struct SlowActivator;

        #[async_trait::async_trait]
        impl ModuleActivator for SlowActivator {
            async fn start(&self, _context: &ExecutionContext) -> anyhow::Result<()> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }

            async fn stop(&self, _context: &ExecutionContext) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let store = Arc::new(MemoryContentStore::new());
        store.stage("mem:slow", content());
        let descriptor = ModuleDescriptor::new(1, "mem:slow", 1);
        let generation = store.read_generation(&descriptor).await.unwrap();
        let config = FrameworkConfig::builder()
            .activation_timeout(Duration::from_millis(20))
            .build();
        let services = Arc::new(FrameworkServices::new(store).with_config(&config));
        let controller =
            ModuleLifecycleController::new(descriptor, generation, Arc::new(SlowActivator), services);

        let err = controller.start(StartOptions::empty()).await.unwrap_err();
        assert!(err.to_string().contains("毫秒"));
        assert_eq!(controller.state(), ModuleState::Resolved);
    }

    #[tokio::test]
    async fn test_update_content_read_failure() {
        // 位置上的内容被移除后无法重新读取
        let store = Arc::new(MemoryContentStore::new());
        let descriptor = ModuleDescriptor::new(2, "mem:gone", 1);
        store.stage("mem:gone", content());
        let generation = store.read_generation(&descriptor).await.unwrap();
        store.unstage("mem:gone");
        let services = Arc::new(FrameworkServices::new(store));
        let orphan = Arc::new(ModuleLifecycleController::new(
            descriptor,
            generation,
            Arc::new(NoopActivator),
            services,
        ));
        orphan.start(StartOptions::empty()).await.unwrap();
        let before = orphan.current_generation().revision();

        let err = orphan.update(None).await.unwrap_err();
        assert!(matches!(err, CoreError::ContentRead { module: 2, .. }));
        assert_eq!(orphan.state(), ModuleState::Active);
        assert_eq!(orphan.current_generation().revision(), before);
    }

    #[tokio::test]
    async fn test_wait_for_stop() {
        let controller = controller_with(content(), Arc::new(NoopActivator)).await;
        assert_eq!(
            controller.wait_for_stop(Duration::from_millis(10)).await,
            StopOutcome::Stopped
        );

        controller.start(StartOptions::empty()).await.unwrap();
        assert_eq!(
            controller.wait_for_stop(Duration::from_millis(10)).await,
            StopOutcome::TimedOut
        );

        let waiter = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.wait_for_stop(Duration::ZERO).await })
        };
        tokio::task::yield_now().await;
        controller.update(None).await.unwrap();
        assert_eq!(waiter.await.unwrap(), StopOutcome::StoppedUpdate);
        assert_eq!(controller.state(), ModuleState::Active);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_wait_for_stop_wakes_on_activation_failure() {
        struct FailingActivator;

        #[async_trait::async_trait]
        impl ModuleActivator for FailingActivator {
            async fn start(&self, _context: &ExecutionContext) -> anyhow::Result<()> {
                tokio::time::sleep(Duration::from_millis(100)).await;
                anyhow::bail!("start failed")
            }

            async fn stop(&self, _context: &ExecutionContext) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let controller = controller_with(content(), Arc::new(FailingActivator)).await;
        let starter = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.start(StartOptions::empty()).await })
        };
        while controller.state() != ModuleState::Starting {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // 激活失败回到 RESOLVED，等待者在超时前被唤醒
        assert_eq!(
            controller.wait_for_stop(Duration::from_millis(1000)).await,
            StopOutcome::Stopped
        );
        assert!(matches!(
            starter.await.unwrap(),
            Err(CoreError::Activation { module: 1, .. })
        ));
        assert_eq!(controller.state(), ModuleState::Resolved);
    }

    #[tokio::test]
    async fn test_wait_for_stop_wakes_on_failed_lazy_trigger() {
        let activator = Arc::new(FlakyActivator {
            fail_start: AtomicBool::new(true),
            fail_stop: AtomicBool::new(false),
        });
        let controller = controller_with(content().lazy(), activator).await;
        controller
            .start(StartOptions::USE_ACTIVATION_POLICY)
            .await
            .unwrap();
        assert_eq!(controller.state(), ModuleState::LazyStarting);

        let waiter = {
            let controller = controller.clone();
            tokio::spawn(async move {
                tokio::time::timeout(
                    Duration::from_secs(5),
                    controller.wait_for_stop(Duration::ZERO),
                )
                .await
            })
        };
        tokio::task::yield_now().await;

        // 触发的激活失败，查找仍然报告未找到
        assert!(controller.find_symbol("org.example.Missing").await.unwrap().is_none());
        assert_eq!(controller.state(), ModuleState::Resolved);
        assert!(controller.context().is_none());
        assert_eq!(waiter.await.unwrap(), Ok(StopOutcome::Stopped));
    }

    #[tokio::test]
    async fn test_uninstalled_rejects_operations() {
        let controller = controller_with(content(), Arc::new(NoopActivator)).await;
        controller.start(StartOptions::empty()).await.unwrap();
        controller.uninstall().await.unwrap();

        assert_eq!(controller.state(), ModuleState::Uninstalled);
        assert!(controller.context().is_none());
        for err in [
            controller.start(StartOptions::empty()).await.unwrap_err(),
            controller.stop(StopOptions::empty()).await.unwrap_err(),
            controller.update(None).await.unwrap_err(),
            controller.uninstall().await.unwrap_err(),
        ] {
            assert!(matches!(err, CoreError::InvalidOperation(_)));
        }
        assert!(controller.find_symbol("x").await.is_err());
    }
}
