//! 运行状态
//!
//! 主执行路径在每次作业切换时整体替换 (作业, 虚拟机) 对，中断处理方任何时刻读取到的都是完整的一对。

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use crate::config::{Job, VmDescriptor};

/// 当前作业所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    /// 正在执行操作
    Running,
    /// 操作失败，尚未开始回滚
    Failed,
    /// 正在回滚
    RollingBack,
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobPhase::Running => write!(f, "执行中"),
            JobPhase::Failed => write!(f, "已失败"),
            JobPhase::RollingBack => write!(f, "回滚中"),
        }
    }
}

/// 正在执行的作业及其虚拟机
#[derive(Debug, Clone)]
pub struct ActiveJob {
    /// 作业在配置中的位置 (从 0 开始)
    pub index: usize,
    pub job: Arc<Job>,
    pub vm: Arc<VmDescriptor>,
    pub phase: JobPhase,
}

impl ActiveJob {
    pub fn new(index: usize, job: Arc<Job>, vm: Arc<VmDescriptor>) -> Self {
        Self {
            index,
            job,
            vm,
            phase: JobPhase::Running,
        }
    }
}

/// 中断监视器看到的状态
#[derive(Debug, Clone)]
pub enum MonitorState {
    /// 没有作业在执行
    Idle,
    /// 有作业在执行
    Armed(ActiveJob),
}

impl MonitorState {
    pub fn is_armed(&self) -> bool {
        matches!(self, MonitorState::Armed(_))
    }
}

/// 单槽运行状态，基于 watch 通道
#[derive(Debug)]
pub struct RunStateCell {
    tx: watch::Sender<Option<ActiveJob>>,
}

impl RunStateCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// 开始一个作业
    pub fn arm(&self, job: ActiveJob) {
        self.tx.send_replace(Some(job));
    }

    /// 修改当前作业的阶段
    pub fn set_phase(&self, phase: JobPhase) {
        self.tx.send_modify(|slot| {
            if let Some(active) = slot {
                active.phase = phase;
            }
        });
    }

    /// 作业结束
    pub fn disarm(&self) {
        self.tx.send_replace(None);
    }

    /// 当前状态快照
    pub fn current(&self) -> MonitorState {
        match self.tx.borrow().as_ref() {
            Some(active) => MonitorState::Armed(active.clone()),
            None => MonitorState::Idle,
        }
    }
}

impl Default for RunStateCell {
    fn default() -> Self {
        Self::new()
    }
}
