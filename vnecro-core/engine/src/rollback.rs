//! 回滚: 先关机，再恢复快照
//!
//! 作业失败和外部中断走同一个函数

use tracing::{info, warn};
use vnecro_backend::VmBackend;

use crate::config::VmDescriptor;
use crate::{EngineError, Result};

/// 将虚拟机回滚到指定快照
///
/// 关机失败只记录警告，仍然尝试恢复快照；恢复失败返回 [`EngineError::RollbackFailed`]
pub async fn rollback(backend: &dyn VmBackend, vm: &VmDescriptor, snapshot: &str) -> Result<()> {
    info!(
        "开始回滚虚拟机 '{}' ({}) 到快照 '{}'",
        vm.alias, vm.vm_name, snapshot
    );

    match backend.shutdown(&vm.vm_name).await {
        Ok(status) => info!("回滚前关机: {}", status),
        Err(e) => warn!("回滚前关闭虚拟机 '{}' 失败，继续恢复快照: {}", vm.vm_name, e),
    }

    backend
        .restore_snapshot(&vm.vm_name, snapshot)
        .await
        .map_err(|source| EngineError::RollbackFailed {
            vm: vm.vm_name.clone(),
            snapshot: snapshot.to_string(),
            source,
        })?;

    info!("虚拟机 '{}' 已回滚到快照 '{}'", vm.vm_name, snapshot);
    Ok(())
}
