//! VirtualBox 后端实现
//!
//! 通过系统 `VBoxManage` 命令控制虚拟机，来宾命令依赖 Guest Additions

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{BackendError, Result};
use crate::traits::{GuestCredentials, ShutdownStatus, VmBackend};

/// 默认管理程序
pub const VBOXMANAGE: &str = "VBoxManage";

/// 就绪检查使用的来宾命令
const PROBE_EXE: &str = "/bin/echo";

/// 命令执行输出
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// 标准输出
    pub stdout: String,
    /// 标准错误
    pub stderr: String,
    /// 退出码
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// 检查命令是否成功执行
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// 获取合并的输出（stdout + stderr）
    pub fn combined_output(&self) -> String {
        let mut out = self.stdout.clone();
        out.push_str(&self.stderr);
        out
    }
}

/// 关机失败的诊断结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerOffDiagnosis {
    /// 虚拟机已处于停止状态
    Stopped(ShutdownStatus),
    /// 虚拟机处于暂停状态，需要先恢复
    Paused,
    /// 真正的失败
    Failed,
}

/// 根据 `controlvm poweroff` 的错误输出判断虚拟机状态
pub fn classify_poweroff_failure(stderr: &str) -> PowerOffDiagnosis {
    let msg = stderr.to_lowercase();

    if msg.contains("not currently running") {
        PowerOffDiagnosis::Stopped(ShutdownStatus::AlreadyOff)
    } else if msg.contains("aborted") {
        PowerOffDiagnosis::Stopped(ShutdownStatus::Aborted)
    } else if msg.contains("paused") {
        PowerOffDiagnosis::Paused
    } else {
        PowerOffDiagnosis::Failed
    }
}

/// 相对路径的可执行文件默认位于 /bin 下
pub fn guest_executable(command: &str) -> String {
    if command.starts_with('/') {
        command.to_string()
    } else {
        format!("/bin/{}", command)
    }
}

/// VirtualBox 后端
#[derive(Debug, Clone)]
pub struct VirtualBoxBackend {
    program: String,
}

impl Default for VirtualBoxBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualBoxBackend {
    /// 使用 PATH 中的 VBoxManage
    pub fn new() -> Self {
        Self::with_program(VBOXMANAGE)
    }

    /// 指定管理程序路径
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// 获取管理程序路径
    pub fn program(&self) -> &str {
        &self.program
    }

    /// 执行管理命令
    async fn run(&self, args: &[String]) -> Result<CommandOutput> {
        let command_line = self.display_command(args);
        debug!("执行命令: {}", command_line);

        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| BackendError::Spawn {
                command: command_line.clone(),
                source,
            })?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        };

        debug!(
            "命令执行完成, 退出码: {:?}, stdout 长度: {}, stderr 长度: {}",
            result.exit_code,
            result.stdout.len(),
            result.stderr.len()
        );

        Ok(result)
    }

    /// 执行管理命令并检查是否成功
    async fn run_checked(&self, args: &[String]) -> Result<CommandOutput> {
        let output = self.run(args).await?;

        if !output.is_success() {
            let stderr = if output.stderr.trim().is_empty() {
                output.stdout.trim().to_string()
            } else {
                output.stderr.trim().to_string()
            };
            return Err(BackendError::CommandFailed {
                command: self.display_command(args),
                code: output.exit_code,
                stderr,
            });
        }

        Ok(output)
    }

    /// 用于日志和错误信息的命令行，密码被隐藏
    fn display_command(&self, args: &[String]) -> String {
        let mut parts = vec![self.program.clone()];
        let mut hide_next = false;
        for arg in args {
            if hide_next {
                parts.push("***".to_string());
                hide_next = false;
            } else {
                hide_next = arg == "--password";
                parts.push(arg.clone());
            }
        }
        parts.join(" ")
    }

    async fn power_off(&self, vm: &str) -> Result<()> {
        self.run_checked(&args(&["controlvm", vm, "poweroff"]))
            .await
            .map(|_| ())
    }

    fn guestcontrol_args(
        vm: &str,
        credentials: &GuestCredentials,
        exe: &str,
        extra: &[String],
    ) -> Vec<String> {
        let mut cmd = args(&[
            "guestcontrol",
            vm,
            "run",
            "--username",
            credentials.username.as_str(),
            "--password",
            credentials.password.as_str(),
            "--exe",
            exe,
            "--",
        ]);
        cmd.extend(extra.iter().cloned());
        cmd
    }
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[async_trait]
impl VmBackend for VirtualBoxBackend {
    fn name(&self) -> &str {
        "virtualbox"
    }

    async fn start(&self, vm: &str) -> Result<()> {
        self.run_checked(&args(&["startvm", vm, "--type", "headless"]))
            .await?;
        Ok(())
    }

    async fn pause(&self, vm: &str) -> Result<()> {
        self.run_checked(&args(&["controlvm", vm, "pause"])).await?;
        Ok(())
    }

    async fn resume(&self, vm: &str) -> Result<()> {
        self.run_checked(&args(&["controlvm", vm, "resume"])).await?;
        Ok(())
    }

    async fn shutdown(&self, vm: &str) -> Result<ShutdownStatus> {
        let err = match self.power_off(vm).await {
            Ok(()) => return Ok(ShutdownStatus::PoweredOff),
            Err(e) => e,
        };

        let Some(diagnosis) = err.stderr().map(classify_poweroff_failure) else {
            return Err(err);
        };

        match diagnosis {
            PowerOffDiagnosis::Stopped(status) => {
                info!("虚拟机 '{}' 已处于停止状态 ({})", vm, status);
                Ok(status)
            }
            PowerOffDiagnosis::Paused => {
                warn!("虚拟机 '{}' 处于暂停状态，恢复后重试关机", vm);
                self.resume(vm).await?;

                let retry_err = match self.power_off(vm).await {
                    Ok(()) => return Ok(ShutdownStatus::PoweredOff),
                    Err(e) => e,
                };
                match retry_err.stderr().map(classify_poweroff_failure) {
                    Some(PowerOffDiagnosis::Stopped(status)) => Ok(status),
                    _ => Err(retry_err),
                }
            }
            PowerOffDiagnosis::Failed => Err(err),
        }
    }

    async fn list_snapshots(&self, vm: &str) -> Result<String> {
        let output = self
            .run_checked(&args(&["snapshot", vm, "list", "--details"]))
            .await?;
        Ok(output.stdout)
    }

    async fn restore_snapshot(&self, vm: &str, snapshot: &str) -> Result<()> {
        self.run_checked(&args(&["snapshot", vm, "restore", snapshot]))
            .await?;
        Ok(())
    }

    async fn probe_guest(&self, vm: &str, credentials: &GuestCredentials) -> Result<()> {
        let cmd = Self::guestcontrol_args(vm, credentials, PROBE_EXE, &args(&["ready"]));
        self.run_checked(&cmd).await?;
        Ok(())
    }

    async fn execute_guest_command(
        &self,
        vm: &str,
        credentials: &GuestCredentials,
        command: &str,
        extra: &[String],
    ) -> Result<String> {
        let exe = guest_executable(command);
        let cmd = Self::guestcontrol_args(vm, credentials, &exe, extra);
        let output = self.run(&cmd).await?;

        if !output.is_success() {
            return Err(BackendError::CommandFailed {
                command: self.display_command(&cmd),
                code: output.exit_code,
                stderr: output.combined_output(),
            });
        }

        Ok(output.combined_output())
    }
}
