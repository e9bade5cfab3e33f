//! 虚拟机后端抽象接口

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::info;

use crate::error::{BackendError, Result};
use crate::snapshot;

/// 来宾就绪轮询间隔
pub const GUEST_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// 关机结果
///
/// 三种状态对引擎来说都是成功，后端负责把自身的诊断信息映射到这里
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStatus {
    /// 本次请求已将虚拟机断电
    PoweredOff,
    /// 虚拟机本来就没有运行
    AlreadyOff,
    /// 虚拟机处于 aborted 状态
    Aborted,
}

impl ShutdownStatus {
    /// 虚拟机在调用前是否已经处于停止状态
    pub fn was_already_stopped(&self) -> bool {
        !matches!(self, ShutdownStatus::PoweredOff)
    }
}

impl fmt::Display for ShutdownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownStatus::PoweredOff => write!(f, "powered off"),
            ShutdownStatus::AlreadyOff => write!(f, "already off"),
            ShutdownStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// 来宾系统登录凭据
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestCredentials {
    pub username: String,
    pub password: String,
}

impl GuestCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// 日志中不输出密码
impl fmt::Debug for GuestCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuestCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// 虚拟机后端 trait
///
/// 每次运行只激活一个实现，由配置中的后端标识符选择
#[async_trait]
pub trait VmBackend: Send + Sync {
    /// 后端名称
    fn name(&self) -> &str;

    /// 启动虚拟机
    async fn start(&self, vm: &str) -> Result<()>;

    /// 暂停虚拟机
    async fn pause(&self, vm: &str) -> Result<()>;

    /// 恢复已暂停的虚拟机
    async fn resume(&self, vm: &str) -> Result<()>;

    /// 关闭虚拟机
    ///
    /// 幂等: 已关机或 aborted 的虚拟机返回对应的 [`ShutdownStatus`] 而不是错误
    async fn shutdown(&self, vm: &str) -> Result<ShutdownStatus>;

    /// 列出快照，返回原始文本
    async fn list_snapshots(&self, vm: &str) -> Result<String>;

    /// 从快照列表中解析第一个快照名称
    fn parse_first_snapshot(&self, listing: &str) -> Result<String> {
        snapshot::parse_first_snapshot(listing)
    }

    /// 恢复快照
    async fn restore_snapshot(&self, vm: &str, snapshot: &str) -> Result<()>;

    /// 尝试一次来宾执行服务就绪检查
    async fn probe_guest(&self, vm: &str, credentials: &GuestCredentials) -> Result<()>;

    /// 等待来宾执行服务就绪
    ///
    /// 每秒调用一次 [`VmBackend::probe_guest`]，直到成功或超过 `timeout`
    async fn wait_for_guest_ready(
        &self,
        vm: &str,
        credentials: &GuestCredentials,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut waited = 0u64;

        loop {
            let err = match self.probe_guest(vm, credentials).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            if Instant::now() >= deadline {
                return Err(BackendError::GuestNotReady {
                    vm: vm.to_string(),
                    waited_secs: timeout.as_secs(),
                    last_error: err.to_string(),
                });
            }

            info!(
                "等待虚拟机 '{}' 来宾执行服务就绪 ({} / {} 秒)",
                vm,
                waited,
                timeout.as_secs()
            );
            waited += 1;
            sleep(GUEST_POLL_INTERVAL).await;
        }
    }

    /// 在来宾系统中执行命令，返回输出文本
    async fn execute_guest_command(
        &self,
        vm: &str,
        credentials: &GuestCredentials,
        command: &str,
        args: &[String],
    ) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 前 N 次就绪检查失败的后端
    struct FlakyGuest {
        failures: usize,
        probes: AtomicUsize,
    }

    impl FlakyGuest {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                probes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl VmBackend for FlakyGuest {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn start(&self, _vm: &str) -> Result<()> {
            Ok(())
        }

        async fn pause(&self, _vm: &str) -> Result<()> {
            Ok(())
        }

        async fn resume(&self, _vm: &str) -> Result<()> {
            Ok(())
        }

        async fn shutdown(&self, _vm: &str) -> Result<ShutdownStatus> {
            Ok(ShutdownStatus::PoweredOff)
        }

        async fn list_snapshots(&self, _vm: &str) -> Result<String> {
            Ok(String::new())
        }

        async fn restore_snapshot(&self, _vm: &str, _snapshot: &str) -> Result<()> {
            Ok(())
        }

        async fn probe_guest(&self, _vm: &str, _credentials: &GuestCredentials) -> Result<()> {
            let n = self.probes.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(BackendError::CommandFailed {
                    command: "probe".to_string(),
                    code: Some(1),
                    stderr: "guest not ready".to_string(),
                })
            } else {
                Ok(())
            }
        }

        async fn execute_guest_command(
            &self,
            _vm: &str,
            _credentials: &GuestCredentials,
            _command: &str,
            _args: &[String],
        ) -> Result<String> {
            Ok(String::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_after_retries() {
        let backend = FlakyGuest::new(3);
        let creds = GuestCredentials::new("user", "pw");
        let start = Instant::now();

        backend
            .wait_for_guest_ready("vm", &creds, Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(backend.probes.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_times_out() {
        let backend = FlakyGuest::new(usize::MAX);
        let creds = GuestCredentials::new("user", "pw");
        let start = Instant::now();

        let err = backend
            .wait_for_guest_ready("vm", &creds, Duration::from_secs(60))
            .await
            .unwrap_err();

        match err {
            BackendError::GuestNotReady {
                vm,
                waited_secs,
                last_error,
            } => {
                assert_eq!(vm, "vm");
                assert_eq!(waited_secs, 60);
                assert!(last_error.contains("guest not ready"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = GuestCredentials::new("admin", "secret");
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn test_shutdown_status() {
        assert!(!ShutdownStatus::PoweredOff.was_already_stopped());
        assert!(ShutdownStatus::AlreadyOff.was_already_stopped());
        assert!(ShutdownStatus::Aborted.was_already_stopped());
    }
}
