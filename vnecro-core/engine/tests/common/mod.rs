//! 引擎测试共用的记录型后端
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use vnecro_backend::{BackendError, GuestCredentials, Result, ShutdownStatus, VmBackend};
use vnecro_engine::{Credential, VmDescriptor};

/// 后端调用记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Start(String),
    Pause(String),
    Resume(String),
    Shutdown(String),
    ListSnapshots(String),
    Restore(String, String),
    Probe(String),
    Execute {
        vm: String,
        user: String,
        command: String,
        args: Vec<String>,
    },
}

/// 记录所有调用、可按方法名注入失败的后端
pub struct MockBackend {
    calls: Mutex<Vec<Call>>,
    failures: HashSet<&'static str>,
    shutdown_status: ShutdownStatus,
    listing: String,
    outputs: HashMap<String, String>,
    guest_ready: bool,
    restore_delay: Option<Duration>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures: HashSet::new(),
            shutdown_status: ShutdownStatus::PoweredOff,
            listing: String::new(),
            outputs: HashMap::new(),
            guest_ready: true,
            restore_delay: None,
        }
    }

    /// 指定方法返回错误: start, pause, resume, shutdown, list, restore, execute
    pub fn fail_on(mut self, method: &'static str) -> Self {
        self.failures.insert(method);
        self
    }

    pub fn with_shutdown_status(mut self, status: ShutdownStatus) -> Self {
        self.shutdown_status = status;
        self
    }

    pub fn with_listing(mut self, listing: &str) -> Self {
        self.listing = listing.to_string();
        self
    }

    pub fn with_output(mut self, command: &str, output: &str) -> Self {
        self.outputs.insert(command.to_string(), output.to_string());
        self
    }

    pub fn guest_never_ready(mut self) -> Self {
        self.guest_ready = false;
        self
    }

    pub fn with_restore_delay(mut self, delay: Duration) -> Self {
        self.restore_delay = Some(delay);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| predicate(call)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn outcome(&self, method: &'static str) -> Result<()> {
        if self.failures.contains(method) {
            Err(BackendError::CommandFailed {
                command: format!("mock {}", method),
                code: Some(1),
                stderr: format!("scripted {} failure", method),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl VmBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn start(&self, vm: &str) -> Result<()> {
        self.record(Call::Start(vm.to_string()));
        self.outcome("start")
    }

    async fn pause(&self, vm: &str) -> Result<()> {
        self.record(Call::Pause(vm.to_string()));
        self.outcome("pause")
    }

    async fn resume(&self, vm: &str) -> Result<()> {
        self.record(Call::Resume(vm.to_string()));
        self.outcome("resume")
    }

    async fn shutdown(&self, vm: &str) -> Result<ShutdownStatus> {
        self.record(Call::Shutdown(vm.to_string()));
        self.outcome("shutdown")?;
        Ok(self.shutdown_status)
    }

    async fn list_snapshots(&self, vm: &str) -> Result<String> {
        self.record(Call::ListSnapshots(vm.to_string()));
        self.outcome("list")?;
        Ok(self.listing.clone())
    }

    async fn restore_snapshot(&self, vm: &str, snapshot: &str) -> Result<()> {
        self.record(Call::Restore(vm.to_string(), snapshot.to_string()));
        if let Some(delay) = self.restore_delay {
            sleep(delay).await;
        }
        self.outcome("restore")
    }

    async fn probe_guest(&self, vm: &str, _credentials: &GuestCredentials) -> Result<()> {
        self.record(Call::Probe(vm.to_string()));
        if self.guest_ready {
            Ok(())
        } else {
            Err(BackendError::CommandFailed {
                command: "mock probe".to_string(),
                code: Some(1),
                stderr: "guest execution service not ready".to_string(),
            })
        }
    }

    async fn execute_guest_command(
        &self,
        vm: &str,
        credentials: &GuestCredentials,
        command: &str,
        args: &[String],
    ) -> Result<String> {
        self.record(Call::Execute {
            vm: vm.to_string(),
            user: credentials.username.clone(),
            command: command.to_string(),
            args: args.to_vec(),
        });
        self.outcome("execute")?;
        Ok(self.outputs.get(command).cloned().unwrap_or_default())
    }
}

/// 带 admin/user 两个角色的测试虚拟机
pub fn vm(alias: &str, vm_name: &str) -> VmDescriptor {
    VmDescriptor::new(alias, vm_name)
        .with_user(Credential::new("admin", "root", "toor"))
        .with_user(Credential::new("user", "bob", "pw"))
}
