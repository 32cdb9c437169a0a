//! 依赖方委托（buddy）策略
//!
//! 当模块自身内容中找不到某个符号时，按依赖图给出的顺序在依赖方中继续查找。
//!
//! - [`DependentPolicy`] 搜索全部依赖方，每次查找时读取依赖图
//! - [`RegisteredPolicy`] 只搜索声明了委托注册、且注册列表包含请求方符号名的依赖方；
//!   候选列表在构造时确定，之后不再变化

use std::sync::{Arc, Weak};

use tracing::{debug, warn};

use super::dependency::DependencyGraph;
use super::generation::{Generation, Resource, Symbol};

/// 委托查找策略
pub trait DelegationPolicy: Send + Sync {
    /// 查找符号，第一个命中的候选胜出
    fn resolve_symbol(&self, name: &str) -> Option<Symbol>;

    /// 查找单个资源，第一个命中的候选胜出
    fn resolve_resource(&self, name: &str) -> Option<Resource>;

    /// 汇总全部候选中的同名资源，按候选顺序
    ///
    /// 单个候选的 I/O 失败按空结果处理，不影响其余候选。
    fn resolve_resource_list(&self, name: &str) -> Vec<Resource>;
}

fn first_symbol<I>(candidates: I, name: &str) -> Option<Symbol>
where
    I: IntoIterator<Item = Arc<Generation>>,
{
    candidates.into_iter().find_map(|candidate| {
        let found = candidate.provider().find_symbol(name);
        if found.is_some() {
            debug!(module_id = candidate.module(), symbol = name, "委托查找命中");
        }
        found
    })
}

fn first_resource<I>(candidates: I, name: &str) -> Option<Resource>
where
    I: IntoIterator<Item = Arc<Generation>>,
{
    candidates
        .into_iter()
        .find_map(|candidate| candidate.provider().find_resource(name))
}

fn all_resources<I>(candidates: I, name: &str) -> Vec<Resource>
where
    I: IntoIterator<Item = Arc<Generation>>,
{
    let mut result = Vec::new();
    for candidate in candidates {
        match candidate.provider().find_resources(name) {
            Ok(found) => result.extend(found),
            Err(e) => {
                warn!(
                    module_id = candidate.module(),
                    resource = name,
                    error = %e,
                    "依赖方资源读取失败，已跳过"
                );
            }
        }
    }
    result
}

/// 依赖方策略：搜索全部依赖方
pub struct DependentPolicy {
    requester: Weak<Generation>,
    graph: Arc<dyn DependencyGraph>,
}

impl DependentPolicy {
    /// 为请求方的当前代创建策略
    pub fn new(requester: &Arc<Generation>, graph: Arc<dyn DependencyGraph>) -> Self {
        Self {
            requester: Arc::downgrade(requester),
            graph,
        }
    }

    /// 当前的依赖方，请求方代已释放时为空
    pub fn candidates(&self) -> Vec<Arc<Generation>> {
        match self.requester.upgrade() {
            Some(requester) => self.graph.dependents_of(&requester),
            None => vec![],
        }
    }
}

impl DelegationPolicy for DependentPolicy {
    fn resolve_symbol(&self, name: &str) -> Option<Symbol> {
        first_symbol(self.candidates(), name)
    }

    fn resolve_resource(&self, name: &str) -> Option<Resource> {
        first_resource(self.candidates(), name)
    }

    fn resolve_resource_list(&self, name: &str) -> Vec<Resource> {
        all_resources(self.candidates(), name)
    }
}

/// 注册策略：只搜索注册为请求方委托的依赖方
pub struct RegisteredPolicy {
    candidates: Vec<Weak<Generation>>,
}

impl RegisteredPolicy {
    /// 根据依赖图构造过滤后的候选列表
    ///
    /// 注册列表缺失、为空或不包含请求方符号名的依赖方被丢弃。
    pub fn new(requester: &Generation, graph: &dyn DependencyGraph) -> Self {
        let requester_name = requester.symbolic_name();
        let candidates: Vec<Weak<Generation>> = graph
            .dependents_of(requester)
            .iter()
            .filter(|dependent| {
                dependent
                    .buddy_registrations()
                    .map(|registered| registered.iter().any(|name| name == requester_name))
                    .unwrap_or(false)
            })
            .map(Arc::downgrade)
            .collect();

        debug!(
            module_id = requester.module(),
            candidates = candidates.len(),
            "构造委托注册策略"
        );
        Self { candidates }
    }

    /// 候选数量（包括已释放的代）
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// 候选列表是否为空
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// 仍然存活的候选，按依赖图顺序
    pub fn candidates(&self) -> Vec<Arc<Generation>> {
        self.candidates.iter().filter_map(Weak::upgrade).collect()
    }
}

impl DelegationPolicy for RegisteredPolicy {
    fn resolve_symbol(&self, name: &str) -> Option<Symbol> {
        if self.candidates.is_empty() {
            return None;
        }
        first_symbol(self.candidates(), name)
    }

    fn resolve_resource(&self, name: &str) -> Option<Resource> {
        if self.candidates.is_empty() {
            return None;
        }
        first_resource(self.candidates(), name)
    }

    fn resolve_resource_list(&self, name: &str) -> Vec<Resource> {
        if self.candidates.is_empty() {
            return vec![];
        }
        all_resources(self.candidates(), name)
    }
}
