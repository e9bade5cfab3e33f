//! 作业配置定义
//!
//! 描述虚拟机列表和作业列表。操作参数在执行时才按类型提取，加载时只校验数据模型约束。

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

use vnecro_backend::{GuestCredentials, DEFAULT_BACKEND};

use crate::{EngineError, Result};

/// 未指定角色时使用的凭据角色
pub const DEFAULT_ROLE: &str = "user";

/// 带角色的来宾用户凭据
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// 角色 (例如 "admin", "user")
    pub role: String,
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(
        role: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("role", &self.role)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// 虚拟机描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmDescriptor {
    /// 作业引用的别名
    pub alias: String,

    /// 后端中的虚拟机名称
    pub vm_name: String,

    /// 来宾用户凭据
    #[serde(default)]
    pub users: Vec<Credential>,

    /// 旧格式: 单个用户名 (视为 "user" 角色)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// 旧格式: 单个密码
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl VmDescriptor {
    pub fn new(alias: impl Into<String>, vm_name: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            vm_name: vm_name.into(),
            users: Vec::new(),
            username: None,
            password: None,
        }
    }

    /// 添加凭据
    pub fn with_user(mut self, credential: Credential) -> Self {
        self.users.push(credential);
        self
    }

    /// 所有凭据 (包含旧格式的单用户)
    pub fn credentials(&self) -> Vec<Credential> {
        let mut all = self.users.clone();
        if let Some(username) = &self.username {
            all.push(Credential::new(
                DEFAULT_ROLE,
                username.clone(),
                self.password.clone().unwrap_or_default(),
            ));
        }
        all
    }

    /// 按角色查找凭据
    pub fn credential_for_role(&self, role: &str) -> Result<GuestCredentials> {
        self.credentials()
            .into_iter()
            .find(|c| c.role == role)
            .map(|c| GuestCredentials::new(c.username, c.password))
            .ok_or_else(|| EngineError::CredentialNotFound {
                role: role.to_string(),
                vm: self.vm_name.clone(),
            })
    }
}

/// 操作参数
///
/// 无模式的键值映射，由各操作在执行时提取所需参数
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置参数
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 字符串参数 (非字符串值视为不存在)
    pub fn optional_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// 必需的非空字符串参数
    pub fn require_str(&self, operation: &str, key: &str) -> Result<&str> {
        match self.optional_str(key) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(EngineError::MissingParameter {
                operation: operation.to_string(),
                name: key.to_string(),
            }),
        }
    }

    /// 字符串列表参数，非字符串元素被忽略
    pub fn string_list(&self, key: &str) -> Vec<String> {
        match self.0.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

// `params:` 留空时 YAML 给出 null
impl<'de> Deserialize<'de> for Params {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let map = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?;
        Ok(Params(map.unwrap_or_default()))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Params(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// 单个操作
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    /// 操作类型 (StartVM, ExecuteShellCommand, ...)，执行时解析
    #[serde(rename = "type")]
    pub kind: String,

    /// 凭据角色
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// 输出保存到的变量名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_as: Option<String>,

    /// 操作参数
    #[serde(default)]
    pub params: Params,

    /// 是否打印命令输出
    #[serde(default)]
    pub print_output: bool,
}

impl Operation {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            role: None,
            store_as: None,
            params: Params::new(),
            print_output: false,
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn store_as(mut self, name: impl Into<String>) -> Self {
        self.store_as = Some(name.into());
        self
    }

    pub fn print_output(mut self) -> Self {
        self.print_output = true;
        self
    }

    /// 凭据角色，默认 "user"
    pub fn role(&self) -> &str {
        match self.role.as_deref() {
            Some(role) if !role.is_empty() => role,
            _ => DEFAULT_ROLE,
        }
    }

    /// 输出变量名 (空字符串视为未设置)
    pub fn capture_name(&self) -> Option<&str> {
        self.store_as.as_deref().filter(|name| !name.is_empty())
    }
}

/// 作业
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// 目标虚拟机别名
    pub vm_alias: String,

    /// 执行前确保虚拟机已关机
    #[serde(default)]
    pub ensure_off: bool,

    /// 失败时回滚到的快照
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_snapshot: Option<String>,

    /// 按顺序执行的操作
    #[serde(default)]
    pub operations: Vec<Operation>,
}

impl Job {
    pub fn new(vm_alias: impl Into<String>) -> Self {
        Self {
            vm_alias: vm_alias.into(),
            ensure_off: false,
            rollback_snapshot: None,
            operations: Vec::new(),
        }
    }

    pub fn ensure_off(mut self) -> Self {
        self.ensure_off = true;
        self
    }

    pub fn with_rollback(mut self, snapshot: impl Into<String>) -> Self {
        self.rollback_snapshot = Some(snapshot.into());
        self
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    /// 回滚快照 (空字符串视为未配置)
    pub fn rollback_target(&self) -> Option<&str> {
        self.rollback_snapshot
            .as_deref()
            .filter(|snapshot| !snapshot.is_empty())
    }
}

fn default_vm_manager() -> String {
    DEFAULT_BACKEND.to_string()
}

/// 完整的作业集配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSetConfig {
    /// 后端标识符
    #[serde(default = "default_vm_manager")]
    pub vm_manager: String,

    /// 虚拟机列表
    #[serde(default)]
    pub vms: Vec<VmDescriptor>,

    /// 作业列表
    #[serde(default)]
    pub jobs: Vec<Job>,
}

impl JobSetConfig {
    /// 按扩展名加载 (.yaml/.yml/.json)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_file(path),
            Some("json") => Self::from_json_file(path),
            _ => Err(EngineError::ConfigLoadFailed(format!(
                "不支持的配置文件格式 {:?}，仅支持 .yaml/.yml 或 .json",
                path
            ))),
        }
    }

    /// 从 YAML 文件加载
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// 从 YAML 字符串加载
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| EngineError::SerdeError(e.to_string()))
    }

    /// 从 JSON 文件加载
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// 从 JSON 字符串加载
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| EngineError::SerdeError(e.to_string()))
    }

    /// 校验数据模型约束
    ///
    /// - 虚拟机别名唯一
    /// - 每个虚拟机每个角色至多一个凭据
    ///
    /// 作业引用未知别名不是加载错误，运行时跳过该作业
    pub fn validate(&self) -> Result<()> {
        let mut aliases = HashSet::new();

        for vm in &self.vms {
            if vm.alias.is_empty() {
                return Err(EngineError::InvalidConfig(format!(
                    "虚拟机 '{}' 缺少别名",
                    vm.vm_name
                )));
            }
            if !aliases.insert(vm.alias.as_str()) {
                return Err(EngineError::InvalidConfig(format!(
                    "虚拟机别名重复: {}",
                    vm.alias
                )));
            }

            let mut roles = HashSet::new();
            for credential in vm.credentials() {
                if !roles.insert(credential.role.clone()) {
                    return Err(EngineError::InvalidConfig(format!(
                        "虚拟机 '{}' 的角色 '{}' 配置了多个用户",
                        vm.alias, credential.role
                    )));
                }
            }
        }

        Ok(())
    }

    /// 按别名查找虚拟机
    pub fn find_vm(&self, alias: &str) -> Result<&VmDescriptor> {
        find_vm(&self.vms, alias)
    }

    /// 引用了未知别名的作业 (序号从 1 开始)
    pub fn unresolved_jobs(&self) -> Vec<(usize, &str)> {
        self.jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| self.find_vm(&job.vm_alias).is_err())
            .map(|(index, job)| (index + 1, job.vm_alias.as_str()))
            .collect()
    }
}

/// 按别名查找虚拟机
pub fn find_vm<'a>(vms: &'a [VmDescriptor], alias: &str) -> Result<&'a VmDescriptor> {
    vms.iter()
        .find(|vm| vm.alias == alias)
        .ok_or_else(|| EngineError::VmNotFound(alias.to_string()))
}
