//! 后端错误定义

use thiserror::Error;

/// 后端操作结果类型
pub type Result<T> = std::result::Result<T, BackendError>;

/// 后端错误类型
#[derive(Error, Debug)]
pub enum BackendError {
    /// 配置中指定的后端标识符未注册
    #[error("未知的虚拟机后端: {0}")]
    UnknownBackend(String),

    /// 后端已注册
    #[error("虚拟机后端已注册: {0}")]
    AlreadyRegistered(String),

    /// 管理命令以非零退出码结束
    #[error("命令执行失败 `{command}` (退出码 {code:?}): {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// 管理命令无法启动
    #[error("启动命令失败 `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// 快照列表中没有可解析的快照名称
    #[error("快照列表中未找到快照")]
    NoSnapshotFound,

    /// 来宾执行服务在超时时间内未就绪
    #[error("虚拟机 '{vm}' 来宾执行服务在 {waited_secs} 秒内未就绪: {last_error}")]
    GuestNotReady {
        vm: String,
        waited_secs: u64,
        last_error: String,
    },
}

impl BackendError {
    /// 命令失败时的标准错误输出 (用于状态分类)
    pub fn stderr(&self) -> Option<&str> {
        match self {
            BackendError::CommandFailed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}
