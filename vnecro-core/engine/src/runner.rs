//! 作业执行
//!
//! [`JobSetDriver`] 按顺序执行所有作业，单个作业失败不影响后续作业。
//! 中断信号与主执行路径竞争: 中断时当前作业视为失败，按同一回滚路径处理后结束运行。

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use vnecro_backend::VmBackend;

use crate::config::{Job, VmDescriptor};
use crate::monitor::{ActiveJob, JobPhase, MonitorState, RunStateCell};
use crate::operations::OperationExecutor;
use crate::rollback::rollback;
use crate::variables::VariableStore;

/// 中断后的进程退出码 (128 + SIGINT)
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// 回滚结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackStatus {
    /// 作业未配置回滚快照
    NotConfigured,
    Succeeded,
    Failed,
}

/// 单个作业的执行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// 所有操作成功
    Succeeded,
    /// 虚拟机别名未找到，作业未执行
    Skipped,
    /// 执行前关机失败，作业放弃 (不回滚)
    Abandoned,
    /// 操作失败
    Failed {
        operation_index: usize,
        rollback: RollbackStatus,
    },
}

/// 整个作业集的运行结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// 所有作业都已执行 (不论成败)
    Completed,
    /// 被外部信号中断
    Interrupted {
        /// 是否对中断时的作业尝试了回滚
        rolled_back: bool,
    },
}

impl RunOutcome {
    /// 进程退出码
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed => 0,
            RunOutcome::Interrupted { .. } => INTERRUPTED_EXIT_CODE,
        }
    }
}

/// 作业集驱动器
pub struct JobSetDriver {
    executor: OperationExecutor,
    vms: Vec<Arc<VmDescriptor>>,
    state: RunStateCell,
    halted: AtomicBool,
}

impl JobSetDriver {
    pub fn new(backend: Arc<dyn VmBackend>, vms: Vec<VmDescriptor>) -> Self {
        Self {
            executor: OperationExecutor::new(backend),
            vms: vms.into_iter().map(Arc::new).collect(),
            state: RunStateCell::new(),
            halted: AtomicBool::new(false),
        }
    }

    /// 设置来宾就绪等待超时
    pub fn with_guest_ready_timeout(mut self, timeout: Duration) -> Self {
        self.executor =
            OperationExecutor::new(Arc::clone(self.executor.backend())).with_guest_ready_timeout(timeout);
        self
    }

    fn backend(&self) -> &dyn VmBackend {
        self.executor.backend().as_ref()
    }

    /// 运行状态
    pub fn run_state(&self) -> &RunStateCell {
        &self.state
    }

    /// 执行所有作业，以 Ctrl-C 作为中断信号
    pub async fn run_all(&self, jobs: Vec<Job>) -> RunOutcome {
        self.run_until(jobs, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("监听中断信号失败: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// 执行所有作业，直到完成或 `interrupt` 就绪
    pub async fn run_until<F>(&self, jobs: Vec<Job>, interrupt: F) -> RunOutcome
    where
        F: Future<Output = ()>,
    {
        // 装箱以便中断时提前析构，正在执行的后端命令随之被终止
        let mut driver = Box::pin(self.run_jobs(jobs));
        tokio::pin!(interrupt);

        // 中断优先
        tokio::select! {
            biased;
            _ = &mut interrupt => {}
            _ = &mut driver => return RunOutcome::Completed,
        }

        warn!("收到中断信号");

        let active = match self.state.current() {
            MonitorState::Idle => {
                info!("没有正在执行的作业，直接退出");
                return RunOutcome::Interrupted { rolled_back: false };
            }
            MonitorState::Armed(active) => active,
        };

        if active.phase == JobPhase::RollingBack {
            warn!(
                "作业 {} 正在回滚，等待回滚完成后停止",
                active.index + 1
            );
            self.halted.store(true, Ordering::SeqCst);
            driver.await;
            return RunOutcome::Interrupted { rolled_back: true };
        }

        drop(driver);
        let rolled_back = self.rollback_job(&active).await != RollbackStatus::NotConfigured;
        self.state.disarm();
        RunOutcome::Interrupted { rolled_back }
    }

    async fn run_jobs(&self, jobs: Vec<Job>) {
        let total = jobs.len();
        let mut store = VariableStore::new();
        let (mut succeeded, mut failed, mut skipped) = (0usize, 0usize, 0usize);

        info!("开始执行 {} 个作业", total);

        for (index, job) in jobs.into_iter().enumerate() {
            if self.halted.load(Ordering::SeqCst) {
                warn!("运行已中断，剩余作业不再执行");
                return;
            }

            match self.run_job(index, Arc::new(job), &mut store).await {
                JobOutcome::Succeeded => succeeded += 1,
                JobOutcome::Skipped => skipped += 1,
                JobOutcome::Abandoned | JobOutcome::Failed { .. } => failed += 1,
            }
        }

        info!(
            "作业集执行完成: 共 {} 个，成功 {} 个，失败 {} 个，跳过 {} 个",
            total, succeeded, failed, skipped
        );
    }

    /// 执行单个作业
    pub async fn run_job(
        &self,
        index: usize,
        job: Arc<Job>,
        store: &mut VariableStore,
    ) -> JobOutcome {
        let number = index + 1;

        let vm = match self.vms.iter().find(|vm| vm.alias == job.vm_alias) {
            Some(vm) => Arc::clone(vm),
            None => {
                error!(
                    "作业 {}: 未找到别名为 '{}' 的虚拟机，跳过该作业",
                    number, job.vm_alias
                );
                return JobOutcome::Skipped;
            }
        };

        info!(
            "作业 {}: 虚拟机 '{}' ({})，共 {} 个操作",
            number,
            vm.alias,
            vm.vm_name,
            job.operations.len()
        );
        let active = ActiveJob::new(index, Arc::clone(&job), Arc::clone(&vm));
        self.state.arm(active.clone());

        if job.ensure_off {
            match self.backend().shutdown(&vm.vm_name).await {
                Ok(status) => info!("作业 {}: 执行前关机: {}", number, status),
                Err(e) => {
                    error!(
                        "作业 {}: 关闭虚拟机 '{}' 失败，放弃该作业: {}",
                        number, vm.vm_name, e
                    );
                    self.state.disarm();
                    return JobOutcome::Abandoned;
                }
            }
        }

        let total = job.operations.len();
        for (op_index, operation) in job.operations.iter().enumerate() {
            info!(
                "作业 {}: 执行操作 {}/{}: {}",
                number,
                op_index + 1,
                total,
                operation.kind
            );

            if let Err(e) = self.executor.execute(&vm, operation, store).await {
                error!(
                    "作业 {}: 操作 {}/{} ({}) 在虚拟机 '{}' 上失败: {}",
                    number,
                    op_index + 1,
                    total,
                    operation.kind,
                    vm.alias,
                    e
                );
                self.state.set_phase(JobPhase::Failed);
                let rollback = self.rollback_job(&active).await;
                self.state.disarm();
                return JobOutcome::Failed {
                    operation_index: op_index,
                    rollback,
                };
            }
        }

        self.state.disarm();
        info!("作业 {}: 完成", number);
        JobOutcome::Succeeded
    }

    // 失败和中断共用
    async fn rollback_job(&self, active: &ActiveJob) -> RollbackStatus {
        let number = active.index + 1;

        let Some(snapshot) = active.job.rollback_target() else {
            warn!("作业 {}: 未配置回滚快照，不执行回滚", number);
            return RollbackStatus::NotConfigured;
        };

        self.state.set_phase(JobPhase::RollingBack);
        match rollback(self.backend(), &active.vm, snapshot).await {
            Ok(()) => RollbackStatus::Succeeded,
            Err(e) => {
                error!("作业 {}: {}", number, e);
                RollbackStatus::Failed
            }
        }
    }
}

/// 执行所有作业，Ctrl-C 中断
pub async fn run_all(
    backend: Arc<dyn VmBackend>,
    vms: Vec<VmDescriptor>,
    jobs: Vec<Job>,
) -> RunOutcome {
    JobSetDriver::new(backend, vms).run_all(jobs).await
}
