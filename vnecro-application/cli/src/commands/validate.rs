//! validate 命令处理

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use super::common::{create_backend, load_config};

pub fn handle(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let backend = create_backend(&config)?;

    println!();
    println!("后端: {}", backend.name().cyan());
    println!();

    println!("{}", "虚拟机:".bold());
    for vm in &config.vms {
        let roles: Vec<String> = vm.credentials().into_iter().map(|c| c.role).collect();
        println!(
            "  {} -> {} [{}]",
            vm.alias.cyan(),
            vm.vm_name,
            roles.join(", ").bright_black()
        );
    }
    println!();

    println!("{}", "作业:".bold());
    for (index, job) in config.jobs.iter().enumerate() {
        let mut flags = Vec::new();
        if job.ensure_off {
            flags.push("ensure_off".to_string());
        }
        if let Some(snapshot) = job.rollback_target() {
            flags.push(format!("rollback={}", snapshot));
        }

        println!(
            "  {}. {} ({} 个操作) {}",
            index + 1,
            job.vm_alias.cyan(),
            job.operations.len().to_string().yellow(),
            flags.join(" ").bright_black()
        );
    }

    let unresolved = config.unresolved_jobs();
    if !unresolved.is_empty() {
        println!();
        for (number, alias) in &unresolved {
            println!(
                "{} 作业 {} 引用了未知的虚拟机别名 '{}'，运行时将被跳过",
                "⚠".yellow().bold(),
                number,
                alias
            );
        }
    }

    println!();
    println!("{} 配置有效", "✓".green().bold());
    Ok(())
}
