//! # 生命周期集成测试
//!
//! 覆盖模块状态机的完整流程：
//! - 安装 → 解析 → 启动 → 停止 → 卸载
//! - 更新时的停止与重启
//! - 后台停止/更新与 `wait_for_stop`
//! - 权限拒绝

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bundle_core::module::{AdminAction, DenyListPermissions};
use bundle_core::{
    CoreError, ExecutionContext, Framework, FrameworkConfig, FrameworkServices,
    LifecycleEventKind, MemoryContentStore, ModuleActivator, ModuleContent, ModuleSettings,
    ModuleState, StartOptions, StopOptions, StopOutcome,
};
use semver::Version;

// ============================================================================
// 测试辅助结构
// ============================================================================

/// 记录回调次数的激活器
#[derive(Default)]
struct CountingActivator {
    starts: AtomicUsize,
    stops: AtomicUsize,
}

#[async_trait::async_trait]
impl ModuleActivator for CountingActivator {
    async fn start(&self, context: &ExecutionContext) -> anyhow::Result<()> {
        assert!(context.is_valid());
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self, _context: &ExecutionContext) -> anyhow::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn content(name: &str) -> ModuleContent {
    ModuleContent::new(name, Version::new(1, 0, 0))
}

fn setup() -> (Arc<MemoryContentStore>, Framework) {
    let store = Arc::new(MemoryContentStore::new());
    let framework = Framework::new(FrameworkConfig::default(), store.clone()).unwrap();
    (store, framework)
}

// ============================================================================
// 状态机
// ============================================================================

#[tokio::test]
async fn test_start_stop_round_trip_keeps_generation() {
    let (store, framework) = setup();
    store.stage("mem:a", content("org.example.a"));
    let activator = Arc::new(CountingActivator::default());
    let module = framework
        .install_with("mem:a", activator.clone())
        .await
        .unwrap();
    let generation = module.current_generation();

    module.start(StartOptions::empty()).await.unwrap();
    assert_eq!(module.state(), ModuleState::Active);
    module.stop(StopOptions::empty()).await.unwrap();
    assert_eq!(module.state(), ModuleState::Resolved);

    assert!(Arc::ptr_eq(&generation, &module.current_generation()));
    assert_eq!(activator.starts.load(Ordering::SeqCst), 1);
    assert_eq!(activator.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let (store, framework) = setup();
    store.stage("mem:a", content("org.example.a"));
    let activator = Arc::new(CountingActivator::default());
    let module = framework
        .install_with("mem:a", activator.clone())
        .await
        .unwrap();

    // 未启动时停止什么也不做
    module.stop(StopOptions::empty()).await.unwrap();
    assert_eq!(module.state(), ModuleState::Installed);

    module.start(StartOptions::empty()).await.unwrap();
    module.stop(StopOptions::empty()).await.unwrap();
    module.stop(StopOptions::empty()).await.unwrap();
    assert_eq!(module.state(), ModuleState::Resolved);
    assert_eq!(activator.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_state_is_terminal_after_uninstall() {
    let (store, framework) = setup();
    store.stage("mem:a", content("org.example.a"));
    let module = framework.install("mem:a").await.unwrap();
    module.start(StartOptions::empty()).await.unwrap();

    framework.uninstall(module.id()).await.unwrap();
    assert_eq!(module.state(), ModuleState::Uninstalled);
    assert!(framework.get(module.id()).is_none());

    assert!(matches!(
        module.start(StartOptions::empty()).await,
        Err(CoreError::InvalidOperation(_))
    ));
    assert!(matches!(module.resolve().await, Err(CoreError::InvalidOperation(_))));
    assert!(module.async_stop(StopOptions::empty()).await.is_err());
    assert_eq!(module.state(), ModuleState::Uninstalled);

    // 当前代被释放回内容存储
    let revision = module.current_generation().revision();
    assert!(store.released().contains(&(module.id(), revision)));
}

#[tokio::test]
async fn test_resolve_failure_keeps_installed() {
    let (store, framework) = setup();
    store.stage("mem:a", content("org.example.a").require("org.example.missing"));
    let module = framework.install("mem:a").await.unwrap();

    let err = module.start(StartOptions::empty()).await.unwrap_err();
    assert!(matches!(err, CoreError::Resolve { .. }));
    assert!(err.to_string().contains("org.example.missing"));
    assert_eq!(module.state(), ModuleState::Installed);
    // 持久化设置在状态机之前记录
    assert!(module.settings().contains(ModuleSettings::AUTO_START));
}

// ============================================================================
// 更新
// ============================================================================

#[tokio::test]
async fn test_update_active_module_restarts() {
    let (store, framework) = setup();
    store.stage("mem:a", content("org.example.a"));
    let activator = Arc::new(CountingActivator::default());
    let module = framework
        .install_with("mem:a", activator.clone())
        .await
        .unwrap();
    module.start(StartOptions::empty()).await.unwrap();
    let mut events = framework.subscribe().unwrap();
    let before = module.current_generation().revision();

    module
        .update(Some(
            ModuleContent::new("org.example.a", Version::new(2, 0, 0)).symbol("org.example.A"),
        ))
        .await
        .unwrap();

    assert_eq!(module.state(), ModuleState::Active);
    assert_eq!(module.version(), Some(Version::new(2, 0, 0)));
    assert!(module.current_generation().revision() > before);
    assert_eq!(module.generation_count().await, 2);
    assert_eq!(activator.starts.load(Ordering::SeqCst), 2);
    assert_eq!(activator.stops.load(Ordering::SeqCst), 1);

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event.kind);
    }
    assert_eq!(
        kinds,
        vec![
            LifecycleEventKind::Stopping,
            LifecycleEventKind::Stopped,
            LifecycleEventKind::Unresolved,
            LifecycleEventKind::Updated,
            LifecycleEventKind::Resolved,
            LifecycleEventKind::Starting,
            LifecycleEventKind::Started,
        ]
    );

    assert_eq!(module.release_retained().await, 1);
    assert!(store.released().contains(&(module.id(), before)));
}

#[tokio::test]
async fn test_update_lazy_module_stays_lazy() {
    let (store, framework) = setup();
    store.stage("mem:lazy", content("org.example.lazy").lazy());
    let module = framework.install("mem:lazy").await.unwrap();
    module
        .start(StartOptions::USE_ACTIVATION_POLICY)
        .await
        .unwrap();
    assert_eq!(module.state(), ModuleState::LazyStarting);

    module.update(None).await.unwrap();
    assert_eq!(module.state(), ModuleState::LazyStarting);
    assert!(module.context().is_some());
}

#[tokio::test]
async fn test_update_installed_module_stays_stopped() {
    let (store, framework) = setup();
    store.stage("mem:a", content("org.example.a"));
    let activator = Arc::new(CountingActivator::default());
    let module = framework
        .install_with("mem:a", activator.clone())
        .await
        .unwrap();
    module.resolve().await.unwrap();

    module.update(None).await.unwrap();
    assert_eq!(module.state(), ModuleState::Installed);
    assert_eq!(activator.starts.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_waits_for_update_restart() {
    /// 停止回调较慢，让更新在持有转换锁时停留一段时间
    #[derive(Default)]
    struct SlowStopActivator {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ModuleActivator for SlowStopActivator {
        async fn start(&self, _context: &ExecutionContext) -> anyhow::Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self, _context: &ExecutionContext) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let (store, framework) = setup();
    store.stage("mem:a", content("org.example.a"));
    let activator = Arc::new(SlowStopActivator::default());
    let module = framework
        .install_with("mem:a", activator.clone())
        .await
        .unwrap();
    module.start(StartOptions::empty()).await.unwrap();
    let mut events = framework.subscribe().unwrap();

    let updater = {
        let module = module.clone();
        tokio::spawn(async move { module.update(None).await })
    };
    while module.state() != ModuleState::Stopping {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // 更新的停止、替换与重启完成后才轮到这次停止
    module.stop(StopOptions::TRANSIENT).await.unwrap();
    updater.await.unwrap().unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event.kind);
    }
    let restarted = kinds
        .iter()
        .position(|kind| *kind == LifecycleEventKind::Started)
        .expect("update restarts the module");
    let last_stopping = kinds
        .iter()
        .rposition(|kind| *kind == LifecycleEventKind::Stopping)
        .unwrap();
    assert!(restarted < last_stopping);
    assert_eq!(kinds.last(), Some(&LifecycleEventKind::Stopped));

    assert_eq!(module.state(), ModuleState::Resolved);
    assert!(module.context().is_none());
    assert_eq!(activator.starts.load(Ordering::SeqCst), 2);
    assert_eq!(activator.stops.load(Ordering::SeqCst), 2);
    // 临时停止保留持久化设置
    assert!(module.settings().contains(ModuleSettings::AUTO_START));
}

// ============================================================================
// 后台操作
// ============================================================================

#[tokio::test]
async fn test_async_stop() {
    let (store, framework) = setup();
    store.stage("mem:a", content("org.example.a"));
    let module = framework.install("mem:a").await.unwrap();

    // 未启动时不派生任务
    assert!(module
        .async_stop(StopOptions::empty())
        .await
        .unwrap()
        .is_none());

    module.start(StartOptions::empty()).await.unwrap();
    let handle = module
        .async_stop(StopOptions::empty())
        .await
        .unwrap()
        .expect("active module spawns a stop task");
    handle.await.unwrap();

    assert_eq!(module.state(), ModuleState::Resolved);
    assert_eq!(module.async_in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_async_stops_end_stopped() {
    let (store, framework) = setup();
    store.stage("mem:a", content("org.example.a"));
    let activator = Arc::new(CountingActivator::default());
    let module = framework
        .install_with("mem:a", activator.clone())
        .await
        .unwrap();
    module.start(StartOptions::empty()).await.unwrap();

    let first = module.async_stop(StopOptions::empty()).await.unwrap();
    let second = module.async_stop(StopOptions::empty()).await.unwrap();
    assert!(first.is_some());
    for handle in [first, second].into_iter().flatten() {
        handle.await.unwrap();
    }

    assert_eq!(module.state(), ModuleState::Resolved);
    // 多派生的任务看到模块已停止，不会重复调用停止回调
    assert_eq!(activator.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_async_update_signals_stop_update() {
    let (store, framework) = setup();
    store.stage("mem:a", content("org.example.a"));
    let module = framework.install("mem:a").await.unwrap();
    module.start(StartOptions::empty()).await.unwrap();

    let waiter = {
        let module = module.clone();
        tokio::spawn(async move { module.wait_for_stop(Duration::from_secs(5)).await })
    };
    tokio::task::yield_now().await;

    let handle = module.async_update(None).await.unwrap().unwrap();
    handle.await.unwrap();

    assert_eq!(waiter.await.unwrap(), StopOutcome::StoppedUpdate);
    assert_eq!(module.state(), ModuleState::Active);
}

#[tokio::test]
async fn test_wait_for_stop_timeouts() {
    let (store, framework) = setup();
    store.stage("mem:a", content("org.example.a"));
    let module = framework.install("mem:a").await.unwrap();

    // 未启动：零超时也立即返回
    assert_eq!(module.wait_for_stop(Duration::ZERO).await, StopOutcome::Stopped);

    module.start(StartOptions::empty()).await.unwrap();
    let started = Instant::now();
    let outcome = module.wait_for_stop(Duration::from_millis(100)).await;
    assert_eq!(outcome, StopOutcome::TimedOut);
    assert!(started.elapsed() >= Duration::from_millis(100));
}

// ============================================================================
// 权限
// ============================================================================

#[tokio::test]
async fn test_permission_denials() {
    let store = Arc::new(MemoryContentStore::new());
    store.stage("mem:a", content("org.example.a").symbol("org.example.A"));
    let permissions = Arc::new(DenyListPermissions::new());
    let services = FrameworkServices::new(store.clone()).with_permissions(permissions.clone());
    let framework = Framework::with_services(FrameworkConfig::default(), services).unwrap();
    let module = framework.install("mem:a").await.unwrap();
    let id = module.id();

    permissions.deny(id, AdminAction::Execute);
    let err = module.start(StartOptions::empty()).await.unwrap_err();
    assert!(matches!(err, CoreError::PermissionDenied(_)));
    assert_eq!(module.state(), ModuleState::Installed);
    permissions.allow(id, AdminAction::Execute);
    module.start(StartOptions::empty()).await.unwrap();

    // 只读访问器恢复为默认值
    permissions.deny(id, AdminAction::Class);
    permissions.deny(id, AdminAction::Context);
    permissions.deny(id, AdminAction::Metadata);
    assert!(module.find_symbol("org.example.A").await.unwrap().is_none());
    assert!(module.context().is_none());
    assert!(module.symbolic_name().is_none());

    permissions.allow(id, AdminAction::Class);
    assert!(module.find_symbol("org.example.A").await.unwrap().is_some());

    permissions.deny(id, AdminAction::Lifecycle);
    assert!(matches!(
        framework.uninstall(id).await,
        Err(CoreError::PermissionDenied(_))
    ));
    assert_eq!(module.state(), ModuleState::Active);
}
