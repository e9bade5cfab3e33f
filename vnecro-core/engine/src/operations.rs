//! 操作执行器
//!
//! 每种操作类型一个处理函数。参数在执行时按类型提取，缺失或类型错误立即失败。

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info};
use unicode_width::UnicodeWidthStr;
use vnecro_backend::VmBackend;

use crate::assertion::{assert_variable, Operator, ValueType};
use crate::config::{Operation, VmDescriptor};
use crate::variables::VariableStore;
use crate::{EngineError, Result};

/// 来宾执行服务就绪等待超时
pub const GUEST_READY_TIMEOUT: Duration = Duration::from_secs(60);

/// 操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    StartVm,
    PauseVm,
    ResumeVm,
    ShutdownVm,
    RestoreSnapshot,
    ExecuteShellCommand,
    Assert,
    Wait,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::StartVm => "StartVM",
            OperationKind::PauseVm => "PauseVM",
            OperationKind::ResumeVm => "ResumeVM",
            OperationKind::ShutdownVm => "ShutdownVM",
            OperationKind::RestoreSnapshot => "RestoreSnapshot",
            OperationKind::ExecuteShellCommand => "ExecuteShellCommand",
            OperationKind::Assert => "Assert",
            OperationKind::Wait => "Wait",
        }
    }
}

impl FromStr for OperationKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "StartVM" => Ok(OperationKind::StartVm),
            "PauseVM" => Ok(OperationKind::PauseVm),
            "ResumeVM" => Ok(OperationKind::ResumeVm),
            "ShutdownVM" => Ok(OperationKind::ShutdownVm),
            "RestoreSnapshot" => Ok(OperationKind::RestoreSnapshot),
            "ExecuteShellCommand" => Ok(OperationKind::ExecuteShellCommand),
            "Assert" => Ok(OperationKind::Assert),
            "Wait" => Ok(OperationKind::Wait),
            _ => Err(EngineError::UnknownOperation(s.to_string())),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 操作执行器
pub struct OperationExecutor {
    backend: Arc<dyn VmBackend>,
    guest_ready_timeout: Duration,
}

impl OperationExecutor {
    pub fn new(backend: Arc<dyn VmBackend>) -> Self {
        Self {
            backend,
            guest_ready_timeout: GUEST_READY_TIMEOUT,
        }
    }

    /// 设置来宾就绪等待超时
    pub fn with_guest_ready_timeout(mut self, timeout: Duration) -> Self {
        self.guest_ready_timeout = timeout;
        self
    }

    pub fn backend(&self) -> &Arc<dyn VmBackend> {
        &self.backend
    }

    /// 执行单个操作
    pub async fn execute(
        &self,
        vm: &VmDescriptor,
        operation: &Operation,
        store: &mut VariableStore,
    ) -> Result<()> {
        let kind: OperationKind = operation.kind.parse()?;
        debug!("执行操作 {} (虚拟机 '{}')", kind, vm.alias);

        match kind {
            OperationKind::StartVm => self
                .backend
                .start(&vm.vm_name)
                .await
                .map_err(EngineError::backend("启动虚拟机", &vm.vm_name)),
            OperationKind::PauseVm => self
                .backend
                .pause(&vm.vm_name)
                .await
                .map_err(EngineError::backend("暂停虚拟机", &vm.vm_name)),
            OperationKind::ResumeVm => self
                .backend
                .resume(&vm.vm_name)
                .await
                .map_err(EngineError::backend("恢复虚拟机", &vm.vm_name)),
            OperationKind::ShutdownVm => {
                let status = self
                    .backend
                    .shutdown(&vm.vm_name)
                    .await
                    .map_err(EngineError::backend("关闭虚拟机", &vm.vm_name))?;
                info!("虚拟机 '{}' 关机: {}", vm.vm_name, status);
                Ok(())
            }
            OperationKind::RestoreSnapshot => self.restore_snapshot(vm, operation).await,
            OperationKind::ExecuteShellCommand => {
                self.execute_shell_command(vm, operation, store).await
            }
            OperationKind::Assert => self.assert(operation, store),
            OperationKind::Wait => self.wait(operation).await,
        }
    }

    async fn restore_snapshot(&self, vm: &VmDescriptor, operation: &Operation) -> Result<()> {
        let explicit = operation
            .params
            .optional_str("snapshot")
            .filter(|name| !name.is_empty());

        let snapshot = match explicit {
            Some(name) => name.to_string(),
            None => {
                let listing = self
                    .backend
                    .list_snapshots(&vm.vm_name)
                    .await
                    .map_err(EngineError::backend("列出快照", &vm.vm_name))?;
                let name = self
                    .backend
                    .parse_first_snapshot(&listing)
                    .map_err(EngineError::backend("解析快照列表", &vm.vm_name))?;
                info!("未指定快照，使用第一个快照 '{}'", name);
                name
            }
        };

        self.backend
            .restore_snapshot(&vm.vm_name, &snapshot)
            .await
            .map_err(EngineError::backend("恢复快照", &vm.vm_name))?;
        info!("虚拟机 '{}' 已恢复到快照 '{}'", vm.vm_name, snapshot);
        Ok(())
    }

    async fn execute_shell_command(
        &self,
        vm: &VmDescriptor,
        operation: &Operation,
        store: &mut VariableStore,
    ) -> Result<()> {
        let name = OperationKind::ExecuteShellCommand.as_str();
        let command = operation.params.require_str(name, "command")?;
        let args = operation.params.string_list("args");
        let credentials = vm.credential_for_role(operation.role())?;

        self.backend
            .wait_for_guest_ready(&vm.vm_name, &credentials, self.guest_ready_timeout)
            .await
            .map_err(EngineError::backend("等待来宾就绪", &vm.vm_name))?;

        let output = self
            .backend
            .execute_guest_command(&vm.vm_name, &credentials, command, &args)
            .await
            .map_err(EngineError::backend("执行来宾命令", &vm.vm_name))?;

        if operation.print_output {
            info!("执行命令: {}", command_line(command, &args));
            info!("命令输出:\n{}", box_output(&output));
        }

        if let Some(variable) = operation.capture_name() {
            debug!("保存输出到变量 '{}'", variable);
            store.set(variable, output);
        }

        Ok(())
    }

    fn assert(&self, operation: &Operation, store: &VariableStore) -> Result<()> {
        let name = OperationKind::Assert.as_str();
        let params = &operation.params;

        let variable = params.require_str(name, "variable")?;
        let operator: Operator = params.require_str(name, "operator")?.parse()?;
        // 期望值可以是空字符串
        let expected = params
            .optional_str("expected")
            .ok_or_else(|| EngineError::MissingParameter {
                operation: name.to_string(),
                name: "expected".to_string(),
            })?;
        let value_type: ValueType = params.optional_str("type").unwrap_or_default().parse()?;

        assert_variable(store, variable, operator, expected, value_type)?;
        info!(
            "断言通过: {} {} '{}' ({})",
            variable, operator, expected, value_type
        );
        Ok(())
    }

    async fn wait(&self, operation: &Operation) -> Result<()> {
        let seconds = wait_seconds(operation)?;
        let duration = Duration::from_secs(seconds);

        let wake_at = i64::try_from(seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|delta| Local::now().checked_add_signed(delta));
        match wake_at {
            Some(at) => info!(
                "等待 {} 秒，预计 {} 恢复",
                seconds,
                at.format("%Y-%m-%d %H:%M:%S")
            ),
            None => info!("等待 {} 秒", seconds),
        }

        sleep(duration).await;
        Ok(())
    }
}

fn wait_seconds(operation: &Operation) -> Result<u64> {
    let name = OperationKind::Wait.as_str();
    let invalid = |reason: String| EngineError::InvalidParameter {
        operation: name.to_string(),
        name: "seconds".to_string(),
        reason,
    };

    match operation.params.get("seconds") {
        None | Some(Value::Null) => Err(EngineError::MissingParameter {
            operation: name.to_string(),
            name: "seconds".to_string(),
        }),
        Some(Value::String(raw)) => raw
            .parse::<u64>()
            .map_err(|_| invalid(format!("'{}' 不是非负整数", raw))),
        Some(other) => Err(invalid(format!("需要字符串，实际为 {}", other))),
    }
}

fn command_line(command: &str, args: &[String]) -> String {
    if args.is_empty() {
        command.to_string()
    } else {
        format!("{} {}", command, args.join(" "))
    }
}

/// 将命令输出渲染为 ASCII 方框
///
/// 行宽按终端显示宽度计算 (中文占两列)，末尾换行被去掉
pub fn box_output(output: &str) -> String {
    let mut lines: Vec<&str> = output
        .trim_end_matches(['\n', '\r'])
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .collect();
    if lines.is_empty() {
        lines.push("");
    }

    let width = lines
        .iter()
        .map(|line| line.width())
        .max()
        .unwrap_or(0);
    let border = format!("+{}+", "-".repeat(width + 2));

    let mut rendered = Vec::with_capacity(lines.len() + 2);
    rendered.push(border.clone());
    for line in lines {
        let padding = width - line.width();
        rendered.push(format!("| {}{} |", line, " ".repeat(padding)));
    }
    rendered.push(border);
    rendered.join("\n")
}
