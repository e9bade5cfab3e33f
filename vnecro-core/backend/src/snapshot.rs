//! 快照列表解析
//!
//! 解析 `VBoxManage snapshot <vm> list --details` 风格的输出

use crate::error::{BackendError, Result};

/// 从快照列表中解析第一个快照名称
///
/// # 输出格式示例
///
/// ```text
///    Name: InitialInstallation (UUID: 7f0a6c5e-...) *
///    Description:
/// fresh install
/// ```
///
/// 返回 `InitialInstallation`
pub fn parse_first_snapshot(listing: &str) -> Result<String> {
    for line in listing.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("Name:") else {
            continue;
        };

        let rest = rest.trim();
        // 去掉 " (UUID: ...)" 以及当前快照标记
        let name = match rest.find(" (") {
            Some(idx) => &rest[..idx],
            None => rest,
        };

        if name.is_empty() {
            return Err(BackendError::NoSnapshotFound);
        }
        return Ok(name.to_string());
    }

    Err(BackendError::NoSnapshotFound)
}
