//! SSH 主机模型
//!
//! Host 描述一个远端主机及其凭据与执行策略，构建后只读，
//! 可以在多个并发任务之间直接共享

use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// 主机密钥验证策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyVerification {
    /// 严格模式：只接受 known_hosts 中已记录的主机密钥
    Strict,
    /// 接受模式：首次连接时记录新密钥，之后验证
    ///
    /// 新密钥会追加写入当前用户的 `~/.ssh/known_hosts`，不希望修改该文件时使用 Strict 或 Disabled
    #[default]
    Accept,
    /// 禁用验证（不安全，仅用于开发/测试）
    Disabled,
}

impl std::str::FromStr for HostKeyVerification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "accept" => Ok(Self::Accept),
            "disabled" | "none" | "false" => Ok(Self::Disabled),
            _ => Err(format!("Unknown host key verification mode: {}", s)),
        }
    }
}

/// SSH 认证方式
#[derive(Debug, Clone)]
pub enum SshAuth {
    /// 密码认证
    Password { password: Secret<String> },
    /// 私钥认证
    Key {
        /// 私钥文件路径
        private_key_path: PathBuf,
        /// 私钥密码（如果有）
        passphrase: Option<Secret<String>>,
    },
}

pub const DEFAULT_USERNAME: &str = "root";
pub const DEFAULT_PORT: u16 = 22;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: f64 = 1.0;

/// 远端主机描述
#[derive(Debug, Clone)]
pub struct Host {
    /// 主机地址
    pub hostname: String,

    /// 用户名
    pub username: String,

    /// 端口
    pub port: u16,

    /// 登录密码，同时用作 sudo 密码
    pub password: Option<Secret<String>>,

    /// 私钥文件路径
    pub private_key_path: Option<PathBuf>,

    /// 私钥密码
    pub private_key_passphrase: Option<Secret<String>>,

    /// 是否通过 sudo 提权执行（需要 pty 才会出现密码提示）
    pub use_privilege_escalation: bool,

    /// TCP 连接超时（秒）
    pub connect_timeout_seconds: f64,

    /// 自由标签，仅用于日志上下文
    pub tags: BTreeMap<String, String>,
}

impl Host {
    /// 使用默认值创建主机描述
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            username: DEFAULT_USERNAME.to_string(),
            port: DEFAULT_PORT,
            password: None,
            private_key_path: None,
            private_key_passphrase: None,
            use_privilege_escalation: false,
            connect_timeout_seconds: DEFAULT_CONNECT_TIMEOUT_SECS,
            tags: BTreeMap::new(),
        }
    }

    /// 设置用户名
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// 设置端口
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// 设置密码
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(Secret::new(password.into()));
        self
    }

    /// 设置私钥
    pub fn with_key(mut self, path: impl Into<PathBuf>, passphrase: Option<String>) -> Self {
        self.private_key_path = Some(path.into());
        self.private_key_passphrase = passphrase.map(Secret::new);
        self
    }

    /// 设置是否提权
    pub fn with_privilege_escalation(mut self, enabled: bool) -> Self {
        self.use_privilege_escalation = enabled;
        self
    }

    /// 设置连接超时
    pub fn with_connect_timeout(mut self, timeout_secs: f64) -> Self {
        self.connect_timeout_seconds = timeout_secs;
        self
    }

    /// 添加标签
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// 用展开后的主机名覆盖 hostname
    pub fn renamed(&self, hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ..self.clone()
        }
    }

    /// 获取目标地址字符串
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.username, self.hostname, self.port)
    }

    /// 连接超时，超出 Duration 范围时视为不限制
    pub fn connect_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.connect_timeout_seconds).unwrap_or(Duration::MAX)
    }

    /// sudo 提示时回填的密码
    pub fn escalation_password(&self) -> Option<&str> {
        self.password.as_ref().map(|p| p.expose_secret().as_str())
    }

    /// 按尝试顺序返回可用的认证方式：私钥优先，其次密码
    pub fn auth_methods(&self) -> Vec<SshAuth> {
        let mut methods = Vec::with_capacity(2);
        if let Some(path) = &self.private_key_path {
            methods.push(SshAuth::Key {
                private_key_path: path.clone(),
                passphrase: self.private_key_passphrase.clone(),
            });
        }
        if let Some(password) = &self.password {
            methods.push(SshAuth::Password {
                password: password.clone(),
            });
        }
        methods
    }

    /// 标签渲染为 "k=v,k=v"，用于日志字段
    pub fn tags_display(&self) -> String {
        self.tags
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }
}
