//! 公共工具函数

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use vnecro_backend::{BackendRegistry, VmBackend};
use vnecro_engine::JobSetConfig;

/// 加载并校验配置文件
pub fn load_config(path: &Path) -> Result<JobSetConfig> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    spinner.set_message(format!("加载配置: {}", path.display()));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let loaded = JobSetConfig::from_file(path)
        .with_context(|| format!("无法加载配置文件: {}", path.display()))
        .and_then(|config| {
            config.validate().context("配置校验失败")?;
            Ok(config)
        });

    match &loaded {
        Ok(config) => spinner.finish_with_message(format!(
            "{} 配置加载成功: {} 个虚拟机, {} 个作业",
            "✓".green().bold(),
            config.vms.len().to_string().yellow(),
            config.jobs.len().to_string().yellow()
        )),
        Err(_) => spinner.finish_with_message(format!("{} 配置加载失败", "✗".red().bold())),
    }

    loaded
}

/// 根据配置中的后端标识符创建后端
pub fn create_backend(config: &JobSetConfig) -> Result<Arc<dyn VmBackend>> {
    let registry = BackendRegistry::with_defaults();
    registry.create(&config.vm_manager).with_context(|| {
        format!(
            "无法创建虚拟机后端 '{}' (可用: {})",
            config.vm_manager,
            registry.list().join(", ")
        )
    })
}
