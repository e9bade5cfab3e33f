//! vnecro CLI 应用

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, Level};

mod commands;

#[derive(Parser)]
#[command(name = "vnecro")]
#[command(about = "vnecro - 声明式虚拟机作业执行工具", long_about = None)]
#[command(version)]
struct Cli {
    /// 日志级别
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 执行配置文件中的所有作业
    Run {
        /// 配置文件路径 (.yaml/.yml/.json)
        #[arg(short, long)]
        config_path: PathBuf,
    },

    /// 校验配置文件，不操作任何虚拟机
    Validate {
        /// 配置文件路径 (.yaml/.yml/.json)
        #[arg(short, long)]
        config_path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    tracing_subscriber::fmt().with_max_level(log_level).init();

    info!("vnecro 启动");

    match cli.command {
        Commands::Run { config_path } => {
            let outcome = commands::run::handle(&config_path).await?;
            let code = outcome.exit_code();
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Validate { config_path } => commands::validate::handle(&config_path)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::try_parse_from(["vnecro", "--log-level", "debug", "run", "--config-path", "jobs.yaml"])
            .unwrap();
        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::Run { config_path } => assert_eq!(config_path, PathBuf::from("jobs.yaml")),
            Commands::Validate { .. } => panic!("expected run command"),
        }
    }

    #[test]
    fn test_config_path_required() {
        assert!(Cli::try_parse_from(["vnecro", "validate"]).is_err());
    }
}
