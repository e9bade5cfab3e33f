//! run 命令处理

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use tracing::info;

use vnecro_engine::{run_all, RunOutcome};

use super::common::{create_backend, load_config};

pub async fn handle(config_path: &Path) -> Result<RunOutcome> {
    let config = load_config(config_path)?;
    let backend = create_backend(&config)?;
    info!("使用虚拟机后端: {}", backend.name());

    let outcome = run_all(backend, config.vms, config.jobs).await;

    println!();
    match outcome {
        RunOutcome::Completed => println!("{} 所有作业已执行", "✓".green().bold()),
        RunOutcome::Interrupted { rolled_back } => {
            let note = if rolled_back {
                "已回滚当前作业"
            } else {
                "未执行回滚"
            };
            println!("{} 运行被中断 ({})", "✗".red().bold(), note.yellow());
        }
    }

    Ok(outcome)
}
