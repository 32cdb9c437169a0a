//! 模块内容存储
//!
//! 内容存储拥有全部代（[`Generation`]），负责读取、替换与释放。
//! 框架只通过 [`ContentStore`] 访问它。

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::generation::{Generation, ModuleContent, Resource, Symbol, SymbolProvider};
use super::metadata::{ModuleDescriptor, ModuleId};

/// 内容存储接口
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// 读取模块安装位置上的内容，生成第一个代
    async fn read_generation(&self, module: &ModuleDescriptor) -> io::Result<Arc<Generation>>;

    /// 用新内容替换当前代
    ///
    /// `content` 为 `None` 时重新读取安装位置上的内容。
    async fn replace_generation(
        &self,
        module: &ModuleDescriptor,
        content: Option<ModuleContent>,
    ) -> io::Result<Arc<Generation>>;

    /// 释放不再使用的代
    fn release_generation(&self, generation: &Generation);
}

/// 基于内容描述的符号提供者
pub struct MapSymbolProvider {
    module: ModuleId,
    revision: u64,
    symbols: HashSet<String>,
    resources: HashMap<String, Vec<String>>,
}

impl MapSymbolProvider {
    /// 从模块内容构建
    pub fn new(module: ModuleId, revision: u64, content: &ModuleContent) -> Self {
        Self {
            module,
            revision,
            symbols: content.symbols.iter().cloned().collect(),
            resources: content.resources.clone(),
        }
    }

    fn resource(&self, name: &str, path: &str) -> Resource {
        Resource {
            name: name.to_string(),
            path: path.to_string(),
            module: self.module,
            revision: self.revision,
        }
    }
}

impl SymbolProvider for MapSymbolProvider {
    fn find_symbol(&self, name: &str) -> Option<Symbol> {
        self.symbols.contains(name).then(|| Symbol {
            name: name.to_string(),
            module: self.module,
            revision: self.revision,
        })
    }

    fn find_resource(&self, name: &str) -> Option<Resource> {
        self.resources
            .get(name)
            .and_then(|paths| paths.first())
            .map(|path| self.resource(name, path))
    }

    fn find_resources(&self, name: &str) -> io::Result<Vec<Resource>> {
        Ok(self
            .resources
            .get(name)
            .map(|paths| paths.iter().map(|path| self.resource(name, path)).collect())
            .unwrap_or_default())
    }
}

/// 内存内容存储
///
/// 按安装位置暂存模块内容，代编号全局递增。
pub struct MemoryContentStore {
    staged: Mutex<HashMap<String, ModuleContent>>,
    next_revision: AtomicU64,
    released: Mutex<Vec<(ModuleId, u64)>>,
}

impl MemoryContentStore {
    /// 创建空的内容存储
    pub fn new() -> Self {
        Self {
            staged: Mutex::new(HashMap::new()),
            next_revision: AtomicU64::new(1),
            released: Mutex::new(Vec::new()),
        }
    }

    /// 在指定位置暂存内容，覆盖已有内容
    pub fn stage(&self, location: impl Into<String>, content: ModuleContent) {
        self.staged.lock().insert(location.into(), content);
    }

    /// 移除指定位置的内容
    pub fn unstage(&self, location: &str) -> Option<ModuleContent> {
        self.staged.lock().remove(location)
    }

    /// 已释放的代 `(模块, 代编号)`，按释放顺序
    pub fn released(&self) -> Vec<(ModuleId, u64)> {
        self.released.lock().clone()
    }

    fn build(&self, module: ModuleId, content: &ModuleContent) -> Arc<Generation> {
        let revision = self.next_revision.fetch_add(1, Ordering::SeqCst);
        let provider = Arc::new(MapSymbolProvider::new(module, revision, content));
        Arc::new(Generation::new(module, revision, content, provider))
    }

    fn staged_content(&self, location: &str) -> io::Result<ModuleContent> {
        self.staged.lock().get(location).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("位置 '{}' 没有可读取的内容", location),
            )
        })
    }
}

impl Default for MemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn read_generation(&self, module: &ModuleDescriptor) -> io::Result<Arc<Generation>> {
        let content = self.staged_content(&module.location)?;
        let generation = self.build(module.id, &content);
        debug!(module_id = module.id, revision = generation.revision(), "读取模块内容");
        Ok(generation)
    }

    async fn replace_generation(
        &self,
        module: &ModuleDescriptor,
        content: Option<ModuleContent>,
    ) -> io::Result<Arc<Generation>> {
        let content = match content {
            Some(content) => {
                self.stage(module.location.clone(), content.clone());
                content
            }
            None => self.staged_content(&module.location)?,
        };
        let generation = self.build(module.id, &content);
        debug!(module_id = module.id, revision = generation.revision(), "替换模块内容");
        Ok(generation)
    }

    fn release_generation(&self, generation: &Generation) {
        debug!(
            module_id = generation.module(),
            revision = generation.revision(),
            "释放模块代"
        );
        self.released
            .lock()
            .push((generation.module(), generation.revision()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;

    fn content() -> ModuleContent {
        ModuleContent::new("org.example.a", Version::new(1, 0, 0))
            .symbol("org.example.a.Main")
            .resource("plugin.yaml", "a/plugin.yaml")
            .resource("plugin.yaml", "a/extra/plugin.yaml")
    }

    #[tokio::test]
    async fn test_read_generation() {
        let store = MemoryContentStore::new();
        store.stage("file:a", content());

        let descriptor = ModuleDescriptor::new(1, "file:a", 1);
        let generation = store.read_generation(&descriptor).await.unwrap();

        assert_eq!(generation.symbolic_name(), "org.example.a");
        let symbol = generation.provider().find_symbol("org.example.a.Main").unwrap();
        assert_eq!(symbol.module, 1);
        assert_eq!(symbol.revision, generation.revision());
        assert!(generation.provider().find_symbol("org.example.a.Missing").is_none());

        let first = generation.provider().find_resource("plugin.yaml").unwrap();
        assert_eq!(first.path, "a/plugin.yaml");
        let all = generation.provider().find_resources("plugin.yaml").unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_read_missing_location() {
        let store = MemoryContentStore::new();
        let descriptor = ModuleDescriptor::new(1, "file:missing", 1);

        let err = store.read_generation(&descriptor).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_replace_generation_increments_revision() {
        let store = MemoryContentStore::new();
        store.stage("file:a", content());
        let descriptor = ModuleDescriptor::new(1, "file:a", 1);

        let first = store.read_generation(&descriptor).await.unwrap();
        let second = store
            .replace_generation(
                &descriptor,
                Some(ModuleContent::new("org.example.a", Version::new(2, 0, 0))),
            )
            .await
            .unwrap();
        assert!(second.revision() > first.revision());
        assert_eq!(second.version(), &Version::new(2, 0, 0));

        // 不带内容时重新读取位置上的最新内容
        let third = store.replace_generation(&descriptor, None).await.unwrap();
        assert_eq!(third.version(), &Version::new(2, 0, 0));

        store.release_generation(&first);
        assert_eq!(store.released(), vec![(1, first.revision())]);
    }
}
