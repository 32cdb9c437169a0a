//! 模块代（Generation）
//!
//! 每次安装或更新都会产生一个不可变的内容快照。代由内容存储拥有，
//! 依赖图与委托策略只持有弱引用。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use semver::Version;

use super::metadata::ModuleId;

/// 模块数据命名空间
pub const MODULE_DATA_NAMESPACE: &str = "bundle.module.data";

/// 委托注册属性：该代愿意为哪些符号名的模块充当委托
pub const BUDDY_REGISTERED_ATTRIBUTE: &str = "buddy.registered";

/// 已加载的符号
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol {
    /// 符号名
    pub name: String,
    /// 提供该符号的模块
    pub module: ModuleId,
    /// 提供该符号的代
    pub revision: u64,
}

/// 资源句柄
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Resource {
    /// 资源名
    pub name: String,
    /// 资源在代内容中的路径
    pub path: String,
    /// 提供该资源的模块
    pub module: ModuleId,
    /// 提供该资源的代
    pub revision: u64,
}

/// 代内的符号查找
///
/// 查找只访问本地内容，不应阻塞。
pub trait SymbolProvider: Send + Sync {
    /// 查找单个符号
    fn find_symbol(&self, name: &str) -> Option<Symbol>;

    /// 查找单个资源
    fn find_resource(&self, name: &str) -> Option<Resource>;

    /// 查找同名的全部资源
    fn find_resources(&self, name: &str) -> std::io::Result<Vec<Resource>>;
}

/// 模块代
pub struct Generation {
    module: ModuleId,
    revision: u64,
    symbolic_name: String,
    version: Version,
    requirements: Vec<String>,
    lazy_activation: bool,
    /// 命名空间 -> 属性名 -> 值列表
    attributes: HashMap<String, HashMap<String, Vec<String>>>,
    provider: Arc<dyn SymbolProvider>,
}

impl Generation {
    /// 创建新的代
    pub fn new(
        module: ModuleId,
        revision: u64,
        content: &ModuleContent,
        provider: Arc<dyn SymbolProvider>,
    ) -> Self {
        let mut attributes = HashMap::new();
        if !content.buddy_registered.is_empty() {
            let mut module_data = HashMap::new();
            module_data.insert(
                BUDDY_REGISTERED_ATTRIBUTE.to_string(),
                content.buddy_registered.clone(),
            );
            attributes.insert(MODULE_DATA_NAMESPACE.to_string(), module_data);
        }

        Self {
            module,
            revision,
            symbolic_name: content.symbolic_name.clone(),
            version: content.version.clone(),
            requirements: content.requirements.clone(),
            lazy_activation: content.lazy_activation,
            attributes,
            provider,
        }
    }

    /// 所属模块
    pub fn module(&self) -> ModuleId {
        self.module
    }

    /// 代编号（全局唯一）
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// 符号名
    pub fn symbolic_name(&self) -> &str {
        &self.symbolic_name
    }

    /// 版本
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// 声明需要的提供者符号名
    pub fn requirements(&self) -> &[String] {
        &self.requirements
    }

    /// 是否声明了延迟激活策略
    pub fn lazy_activation(&self) -> bool {
        self.lazy_activation
    }

    /// 读取指定命名空间下的列表属性
    pub fn attribute_list(&self, namespace: &str, attribute: &str) -> Option<&[String]> {
        self.attributes
            .get(namespace)
            .and_then(|attrs| attrs.get(attribute))
            .map(Vec::as_slice)
    }

    /// 委托注册列表
    pub fn buddy_registrations(&self) -> Option<&[String]> {
        self.attribute_list(MODULE_DATA_NAMESPACE, BUDDY_REGISTERED_ATTRIBUTE)
    }

    /// 本代的符号提供者
    pub fn provider(&self) -> &Arc<dyn SymbolProvider> {
        &self.provider
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generation")
            .field("module", &self.module)
            .field("revision", &self.revision)
            .field("symbolic_name", &self.symbolic_name)
            .field("version", &self.version)
            .finish()
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{} [{}:{}]",
            self.symbolic_name, self.version, self.module, self.revision
        )
    }
}

/// 模块内容
///
/// 安装或更新时交给内容存储的内容描述。
#[derive(Debug, Clone)]
pub struct ModuleContent {
    /// 符号名
    pub symbolic_name: String,
    /// 版本
    pub version: Version,
    /// 需要的提供者符号名
    pub requirements: Vec<String>,
    /// 委托注册列表
    pub buddy_registered: Vec<String>,
    /// 是否声明延迟激活策略
    pub lazy_activation: bool,
    /// 本地符号
    pub symbols: Vec<String>,
    /// 资源名 -> 路径列表
    pub resources: HashMap<String, Vec<String>>,
}

impl ModuleContent {
    /// 创建新的模块内容
    pub fn new(symbolic_name: impl Into<String>, version: Version) -> Self {
        Self {
            symbolic_name: symbolic_name.into(),
            version,
            requirements: vec![],
            buddy_registered: vec![],
            lazy_activation: false,
            symbols: vec![],
            resources: HashMap::new(),
        }
    }

    /// 声明依赖
    pub fn require(mut self, symbolic_name: impl Into<String>) -> Self {
        self.requirements.push(symbolic_name.into());
        self
    }

    /// 注册为某个模块的委托
    pub fn register_buddy(mut self, symbolic_name: impl Into<String>) -> Self {
        self.buddy_registered.push(symbolic_name.into());
        self
    }

    /// 声明延迟激活
    pub fn lazy(mut self) -> Self {
        self.lazy_activation = true;
        self
    }

    /// 添加本地符号
    pub fn symbol(mut self, name: impl Into<String>) -> Self {
        self.symbols.push(name.into());
        self
    }

    /// 添加资源
    pub fn resource(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.resources
            .entry(name.into())
            .or_default()
            .push(path.into());
        self
    }
}
