//! 后端注册表
//!
//! 配置中的 `vm_manager` 标识符在这里解析为具体后端

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{BackendError, Result};
use crate::traits::VmBackend;
use crate::virtualbox::VirtualBoxBackend;

/// 默认后端标识符
pub const DEFAULT_BACKEND: &str = "virtualbox";

/// 后端构建器 trait
pub trait BackendBuilder: Send + Sync {
    /// 构建后端实例
    fn build(&self) -> Arc<dyn VmBackend>;
}

impl<F> BackendBuilder for F
where
    F: Fn() -> Arc<dyn VmBackend> + Send + Sync,
{
    fn build(&self) -> Arc<dyn VmBackend> {
        self()
    }
}

/// 后端注册表
pub struct BackendRegistry {
    builders: HashMap<String, Box<dyn BackendBuilder>>,
}

impl BackendRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// 创建包含内置后端的注册表
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for id in [DEFAULT_BACKEND, "vbox"] {
            registry.builders.insert(
                id.to_string(),
                Box::new(|| Arc::new(VirtualBoxBackend::new()) as Arc<dyn VmBackend>),
            );
        }
        registry
    }

    /// 注册后端
    pub fn register(&mut self, id: &str, builder: Box<dyn BackendBuilder>) -> Result<()> {
        let key = id.to_lowercase();
        if self.builders.contains_key(&key) {
            return Err(BackendError::AlreadyRegistered(key));
        }

        debug!("注册虚拟机后端: {}", key);
        self.builders.insert(key, builder);
        Ok(())
    }

    /// 按标识符创建后端 (大小写不敏感)
    pub fn create(&self, id: &str) -> Result<Arc<dyn VmBackend>> {
        let key = id.trim().to_lowercase();
        let builder = self
            .builders
            .get(&key)
            .ok_or_else(|| BackendError::UnknownBackend(id.to_string()))?;

        let backend = builder.build();
        info!("使用虚拟机后端: {} ({})", key, backend.name());
        Ok(backend)
    }

    /// 列出所有已注册的标识符
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.builders.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 检查标识符是否已注册
    pub fn is_registered(&self, id: &str) -> bool {
        self.builders.contains_key(&id.trim().to_lowercase())
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
