//! vnecro 执行引擎
//!
//! 按配置顺序执行作业，每个作业绑定一个虚拟机并依次执行其操作：
//! - 操作失败时停止当前作业，按配置回滚到快照
//! - 操作之间通过变量存储传递输出
//! - 外部中断视为当前作业失败，回滚后终止运行

pub mod assertion;
pub mod config;
pub mod monitor;
pub mod operations;
pub mod rollback;
pub mod runner;
pub mod variables;

pub use assertion::{assert_variable, evaluate, AssertionError, Operator, Side, ValueType};
pub use config::{Credential, Job, JobSetConfig, Operation, Params, VmDescriptor, DEFAULT_ROLE};
pub use monitor::{ActiveJob, JobPhase, MonitorState, RunStateCell};
pub use operations::{box_output, OperationExecutor, OperationKind, GUEST_READY_TIMEOUT};
pub use rollback::rollback;
pub use runner::{run_all, JobOutcome, JobSetDriver, RollbackStatus, RunOutcome};
pub use variables::VariableStore;

use thiserror::Error;
use vnecro_backend::BackendError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    #[error("配置无效: {0}")]
    InvalidConfig(String),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    SerdeError(String),

    #[error("未找到别名为 '{0}' 的虚拟机")]
    VmNotFound(String),

    #[error("未知的操作类型: {0}")]
    UnknownOperation(String),

    #[error("{operation} 操作缺少参数 '{name}'")]
    MissingParameter { operation: String, name: String },

    #[error("{operation} 操作参数 '{name}' 无效: {reason}")]
    InvalidParameter {
        operation: String,
        name: String,
        reason: String,
    },

    #[error("虚拟机 '{vm}' 未配置角色为 '{role}' 的用户")]
    CredentialNotFound { role: String, vm: String },

    #[error("{action}失败 (虚拟机 '{vm}'): {source}")]
    Backend {
        action: &'static str,
        vm: String,
        #[source]
        source: BackendError,
    },

    #[error("断言失败: {0}")]
    Assertion(#[from] AssertionError),

    #[error("回滚失败: 在虚拟机 '{vm}' 上恢复快照 '{snapshot}' 出错: {source}")]
    RollbackFailed {
        vm: String,
        snapshot: String,
        #[source]
        source: BackendError,
    },
}

impl EngineError {
    pub(crate) fn backend(action: &'static str, vm: &str) -> impl FnOnce(BackendError) -> Self {
        let vm = vm.to_string();
        move |source| EngineError::Backend { action, vm, source }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
