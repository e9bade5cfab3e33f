//! vnecro 虚拟机后端
//!
//! 提供引擎依赖的虚拟机原语：
//! - 电源控制 (启动/暂停/恢复/关机，关机幂等)
//! - 快照列表、解析与恢复
//! - 来宾执行服务就绪检查与来宾命令执行
//!
//! # 示例
//!
//! ```ignore
//! use vnecro_backend::{BackendRegistry, GuestCredentials};
//!
//! let backend = BackendRegistry::with_defaults().create("virtualbox")?;
//! backend.start("Ubuntu Web").await?;
//! let creds = GuestCredentials::new("bob", "pw");
//! let out = backend
//!     .execute_guest_command("Ubuntu Web", &creds, "uname", &["-r".to_string()])
//!     .await?;
//! ```

mod error;
mod registry;
mod snapshot;
mod traits;
mod virtualbox;

pub use error::{BackendError, Result};
pub use registry::{BackendBuilder, BackendRegistry, DEFAULT_BACKEND};
pub use snapshot::parse_first_snapshot;
pub use traits::{GuestCredentials, ShutdownStatus, VmBackend, GUEST_POLL_INTERVAL};
pub use virtualbox::{
    classify_poweroff_failure, guest_executable, CommandOutput, PowerOffDiagnosis,
    VirtualBoxBackend, VBOXMANAGE,
};
