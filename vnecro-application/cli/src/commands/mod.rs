//! CLI 命令处理模块

pub mod common; // 配置加载与后端选择
pub mod run;
pub mod validate;
