//! 模块依赖管理
//!
//! 本模块提供依赖图接口与内存中的连线图实现。
//!
//! # 主要组件
//!
//! - [`DependencyGraph`] - 依赖图接口：查询依赖方、解析代
//! - [`WiringGraph`] - 按建立顺序保存连线（wire）的内存依赖图
//! - [`ResolutionReport`] - 一次解析的结果报告
//!
//! 连线的两端只持有代的弱引用，代的生命周期由内容存储决定。
//!
//! # 示例
//!
//! ```rust
//! use std::sync::Arc;
//! use bundle_core::module::{
//!     DependencyGraph, Generation, MapSymbolProvider, ModuleContent, WiringGraph,
//! };
//! use semver::Version;
//!
//! fn generation(module: u64, revision: u64, content: ModuleContent) -> Arc<Generation> {
//!     let provider = Arc::new(MapSymbolProvider::new(module, revision, &content));
//!     Arc::new(Generation::new(module, revision, &content, provider))
//! }
//!
//! let graph = WiringGraph::new();
//! let api = generation(1, 1, ModuleContent::new("org.example.api", Version::new(1, 0, 0)));
//! let app = generation(
//!     2,
//!     2,
//!     ModuleContent::new("org.example.app", Version::new(1, 0, 0)).require("org.example.api"),
//! );
//! graph.register(&api);
//! graph.register(&app);
//!
//! let report = graph.resolve(&[app.clone()]);
//! assert!(report.is_resolved(app.revision()));
//! assert_eq!(graph.dependents_of(&api)[0].revision(), app.revision());
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::generation::Generation;
use super::metadata::ModuleId;

/// 依赖图接口
///
/// 依赖图负责连线的建立与查询；框架只读取它给出的依赖方顺序，不参与计算。
pub trait DependencyGraph: Send + Sync {
    /// 登记一个可作为提供者的代
    fn register(&self, generation: &Arc<Generation>);

    /// 注销一个代，并移除它作为需求方的全部连线
    fn unregister(&self, generation: &Generation);

    /// 依赖方：连线指向该代的全部需求方代，按连线建立顺序
    fn dependents_of(&self, generation: &Generation) -> Vec<Arc<Generation>>;

    /// 解析一组代，重新计算它们的连线
    fn resolve(&self, generations: &[Arc<Generation>]) -> ResolutionReport;
}

/// 单个代的解析失败
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionFailure {
    /// 模块
    pub module: ModuleId,
    /// 代编号
    pub revision: u64,
    /// 失败原因
    pub reason: String,
}

/// 解析报告
#[derive(Debug, Clone, Default)]
pub struct ResolutionReport {
    resolved: Vec<u64>,
    failures: Vec<ResolutionFailure>,
}

impl ResolutionReport {
    /// 创建空报告
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录解析成功的代
    pub fn mark_resolved(&mut self, revision: u64) {
        self.resolved.push(revision);
    }

    /// 记录解析失败
    pub fn add_failure(&mut self, module: ModuleId, revision: u64, reason: impl Into<String>) {
        self.failures.push(ResolutionFailure {
            module,
            revision,
            reason: reason.into(),
        });
    }

    /// 指定的代是否解析成功
    pub fn is_resolved(&self, revision: u64) -> bool {
        self.resolved.contains(&revision)
    }

    /// 是否全部成功
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// 全部失败
    pub fn failures(&self) -> &[ResolutionFailure] {
        &self.failures
    }
}

impl fmt::Display for ResolutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return write!(f, "{} 个代解析成功", self.resolved.len());
        }
        let reasons: Vec<String> = self
            .failures
            .iter()
            .map(|failure| format!("模块 {}: {}", failure.module, failure.reason))
            .collect();
        f.write_str(&reasons.join("; "))
    }
}

/// 连线：需求方代 -> 提供者代
#[derive(Debug)]
struct Wire {
    requirer_module: ModuleId,
    requirer_revision: u64,
    requirer: Weak<Generation>,
    provider_module: ModuleId,
    provider_revision: u64,
    provider: Weak<Generation>,
}

#[derive(Debug, Default)]
struct WiringState {
    /// 已登记的代，按登记顺序
    generations: Vec<Weak<Generation>>,
    /// 连线，按建立顺序
    wires: Vec<Wire>,
}

impl WiringState {
    /// 丢弃已经被释放的代及其连线
    fn prune(&mut self) {
        self.generations.retain(|generation| generation.strong_count() > 0);
        self.wires
            .retain(|wire| wire.requirer.strong_count() > 0 && wire.provider.strong_count() > 0);
    }

    /// 为需求选择提供者：同名且版本最高的已登记代，不包括需求方自身所在模块
    fn find_provider(&self, requirement: &str, requirer: &Generation) -> Option<Arc<Generation>> {
        self.generations
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|candidate| {
                candidate.module() != requirer.module() && candidate.symbolic_name() == requirement
            })
            .max_by(|a, b| a.version().cmp(b.version()))
    }

    /// 模块级别的正向边：需求方模块 -> 提供者模块
    fn module_edges(&self) -> HashMap<ModuleId, Vec<ModuleId>> {
        let mut edges: HashMap<ModuleId, Vec<ModuleId>> = HashMap::new();
        for wire in &self.wires {
            let providers = edges.entry(wire.requirer_module).or_default();
            if !providers.contains(&wire.provider_module) {
                providers.push(wire.provider_module);
            }
        }
        edges
    }
}

/// 内存连线图
///
/// 元数据放在读写锁后面：查询依赖方可以并发进行，解析与注销独占写锁。
#[derive(Debug, Default)]
pub struct WiringGraph {
    state: RwLock<WiringState>,
}

impl WiringGraph {
    /// 创建空的连线图
    pub fn new() -> Self {
        Self::default()
    }

    /// 该代连线到的提供者，按连线建立顺序
    pub fn providers_of(&self, generation: &Generation) -> Vec<Arc<Generation>> {
        let state = self.state.read();
        let mut seen = HashSet::new();
        state
            .wires
            .iter()
            .filter(|wire| wire.requirer_revision == generation.revision())
            .filter_map(|wire| wire.provider.upgrade())
            .filter(|provider| seen.insert(provider.revision()))
            .collect()
    }

    /// 当前连线数量（包括尚未清理的失效连线）
    pub fn wire_count(&self) -> usize {
        self.state.read().wires.len()
    }
}

impl DependencyGraph for WiringGraph {
    fn register(&self, generation: &Arc<Generation>) {
        let mut state = self.state.write();
        state.prune();
        let revision = generation.revision();
        let known = state
            .generations
            .iter()
            .filter_map(Weak::upgrade)
            .any(|g| g.revision() == revision);
        if !known {
            state.generations.push(Arc::downgrade(generation));
        }
    }

    fn unregister(&self, generation: &Generation) {
        let mut state = self.state.write();
        let revision = generation.revision();
        state.generations.retain(|candidate| {
            candidate
                .upgrade()
                .map(|g| g.revision() != revision)
                .unwrap_or(false)
        });
        state.wires.retain(|wire| wire.requirer_revision != revision);
        state.prune();
    }

    fn dependents_of(&self, generation: &Generation) -> Vec<Arc<Generation>> {
        let state = self.state.read();
        let mut seen = HashSet::new();
        state
            .wires
            .iter()
            .filter(|wire| wire.provider_revision == generation.revision())
            .filter_map(|wire| wire.requirer.upgrade())
            .filter(|requirer| seen.insert(requirer.revision()))
            .collect()
    }

    fn resolve(&self, generations: &[Arc<Generation>]) -> ResolutionReport {
        let mut state = self.state.write();
        state.prune();

        let mut report = ResolutionReport::new();
        for generation in generations {
            let module = generation.module();
            let revision = generation.revision();

            // 每次解析都重新计算连线
            state
                .wires
                .retain(|wire| wire.requirer_revision != revision);

            let mut providers = Vec::new();
            let mut missing = Vec::new();
            for requirement in generation.requirements() {
                match state.find_provider(requirement, generation) {
                    Some(provider) => providers.push(provider),
                    None => missing.push(requirement.clone()),
                }
            }
            if !missing.is_empty() {
                warn!(module_id = module, missing = ?missing, "缺少依赖，解析失败");
                report.add_failure(module, revision, format!("缺少依赖: {}", missing.join(", ")));
                continue;
            }

            let mut edges = state.module_edges();
            let targets = edges.entry(module).or_default();
            for provider in &providers {
                if !targets.contains(&provider.module()) {
                    targets.push(provider.module());
                }
            }
            if let Some(cycle) = find_cycle(&edges) {
                let path: Vec<String> = cycle.iter().map(ToString::to_string).collect();
                warn!(module_id = module, cycle = %path.join(" -> "), "检测到循环依赖");
                report.add_failure(module, revision, format!("循环依赖: {}", path.join(" -> ")));
                continue;
            }

            for provider in providers {
                debug!(
                    module_id = module,
                    provider = provider.module(),
                    "建立连线"
                );
                state.wires.push(Wire {
                    requirer_module: module,
                    requirer_revision: revision,
                    requirer: Arc::downgrade(generation),
                    provider_module: provider.module(),
                    provider_revision: provider.revision(),
                    provider: Arc::downgrade(&provider),
                });
            }
            report.mark_resolved(revision);
        }

        report
    }
}

/// 查找循环依赖路径（DFS）
///
/// 如果存在循环，返回闭合的模块路径，例如 `[1, 2, 1]`。
fn find_cycle(edges: &HashMap<ModuleId, Vec<ModuleId>>) -> Option<Vec<ModuleId>> {
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    let mut nodes: Vec<ModuleId> = edges.keys().copied().collect();
    nodes.sort_unstable();
    for node in nodes {
        if let Some(cycle) = find_cycle_util(edges, node, &mut visited, &mut rec_stack, &mut path) {
            return Some(cycle);
        }
    }

    None
}

fn find_cycle_util(
    edges: &HashMap<ModuleId, Vec<ModuleId>>,
    node: ModuleId,
    visited: &mut HashSet<ModuleId>,
    rec_stack: &mut HashSet<ModuleId>,
    path: &mut Vec<ModuleId>,
) -> Option<Vec<ModuleId>> {
    if rec_stack.contains(&node) {
        let start = path.iter().position(|n| *n == node).unwrap_or(0);
        let mut cycle = path[start..].to_vec();
        cycle.push(node);
        return Some(cycle);
    }

    if !visited.insert(node) {
        return None;
    }
    rec_stack.insert(node);
    path.push(node);

    if let Some(neighbors) = edges.get(&node) {
        for &neighbor in neighbors {
            if let Some(cycle) = find_cycle_util(edges, neighbor, visited, rec_stack, path) {
                return Some(cycle);
            }
        }
    }

    path.pop();
    rec_stack.remove(&node);
    None
}
