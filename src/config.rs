//! 配置系统
//! 内置默认值 → 环境变量（前缀 OPS_PSSH_）→ 命令行覆盖，加载后统一校验

use config::{Config, ConfigError, Environment, Value};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use common::ssh::HostKeyVerification;

use crate::concurrency::ConcurrencyConfig;
use crate::ssh::SshSettings;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "OPS_PSSH";

#[derive(Debug, Clone, Deserialize)]
pub struct InventoryConfig {
    /// Inventory 文件路径
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    pub level: String,
    /// 日志格式: json, pretty, compact
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// 最大并发主机数，0 表示不限制
    pub max_concurrency: u64,
    /// 单个主机任务的超时时间（秒），0 表示不限制
    pub task_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    /// SSH 握手超时（秒）
    pub banner_timeout_secs: u64,
    /// 等待输出的超时（秒），0 表示不限制
    pub read_timeout_secs: u64,
    /// 主机密钥验证策略
    pub host_key_verification: HostKeyVerification,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub inventory: InventoryConfig,
    pub logging: LoggingConfig,
    pub dispatch: DispatchConfig,
    pub ssh: SshConfig,
}

/// 默认 Inventory 路径：~/.ops-pssh/inventory/inventory.yaml
pub fn default_inventory_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".ops-pssh")
        .join("inventory")
        .join("inventory.yaml")
}

impl AppConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Vec::new())
    }

    /// 加载配置，`overrides` 中的键值（如 `dispatch.max_concurrency`）优先于环境变量
    pub fn load(overrides: Vec<(&'static str, Value)>) -> Result<Self, ConfigError> {
        let mut settings = Config::builder()
            .set_default(
                "inventory.path",
                default_inventory_path().to_string_lossy().into_owned(),
            )?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "compact")?
            .set_default("dispatch.max_concurrency", 0)?
            .set_default("dispatch.task_timeout_secs", 0)?
            .set_default("ssh.banner_timeout_secs", 300)?
            .set_default("ssh.read_timeout_secs", 0)?
            .set_default("ssh.host_key_verification", "accept")?;

        settings = settings.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        for (key, value) in overrides {
            settings = settings.set_override(key, value)?;
        }

        let config: AppConfig = settings.build()?.try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// 验证配置合法性
    fn validate(&self) -> Result<(), ConfigError> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log format: {}. Must be one of: json, pretty, compact",
                    self.logging.format
                )))
            }
        }

        if self.ssh.banner_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "ssh.banner_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.inventory.path.as_os_str().is_empty() {
            return Err(ConfigError::Message("inventory.path must not be empty".to_string()));
        }

        Ok(())
    }

    /// 分发器配置
    pub fn concurrency(&self) -> ConcurrencyConfig {
        let mut config = ConcurrencyConfig::default()
            .with_max_concurrency(self.dispatch.max_concurrency as usize);
        if self.dispatch.task_timeout_secs > 0 {
            config = config.with_task_timeout(Duration::from_secs(self.dispatch.task_timeout_secs));
        }
        config
    }

    /// SSH 会话设置
    pub fn ssh_settings(&self) -> SshSettings {
        SshSettings {
            banner_timeout: Duration::from_secs(self.ssh.banner_timeout_secs),
            read_timeout: (self.ssh.read_timeout_secs > 0)
                .then(|| Duration::from_secs(self.ssh.read_timeout_secs)),
            host_key_verification: self.ssh.host_key_verification,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "OPS_PSSH_INVENTORY__PATH",
        "OPS_PSSH_LOGGING__LEVEL",
        "OPS_PSSH_LOGGING__FORMAT",
        "OPS_PSSH_DISPATCH__MAX_CONCURRENCY",
        "OPS_PSSH_DISPATCH__TASK_TIMEOUT_SECS",
        "OPS_PSSH_SSH__READ_TIMEOUT_SECS",
        "OPS_PSSH_SSH__HOST_KEY_VERIFICATION",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        clear_env();

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "compact");
        assert_eq!(config.dispatch.max_concurrency, 0);
        assert_eq!(config.ssh.banner_timeout_secs, 300);
        assert_eq!(config.ssh.host_key_verification, HostKeyVerification::Accept);
        assert!(config.inventory.path.ends_with(".ops-pssh/inventory/inventory.yaml"));

        let concurrency = config.concurrency();
        assert_eq!(concurrency.max_concurrency, 0);
        assert!(concurrency.task_timeout.is_none());

        let ssh = config.ssh_settings();
        assert_eq!(ssh.banner_timeout, Duration::from_secs(300));
        assert!(ssh.read_timeout.is_none());
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        clear_env();
        std::env::set_var("OPS_PSSH_INVENTORY__PATH", "/tmp/hosts.yaml");
        std::env::set_var("OPS_PSSH_DISPATCH__MAX_CONCURRENCY", "8");
        std::env::set_var("OPS_PSSH_DISPATCH__TASK_TIMEOUT_SECS", "30");
        std::env::set_var("OPS_PSSH_SSH__READ_TIMEOUT_SECS", "5");
        std::env::set_var("OPS_PSSH_SSH__HOST_KEY_VERIFICATION", "strict");

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.inventory.path, PathBuf::from("/tmp/hosts.yaml"));
        assert_eq!(config.concurrency().max_concurrency, 8);
        assert_eq!(config.concurrency().task_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.ssh_settings().read_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.ssh.host_key_verification, HostKeyVerification::Strict);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_overrides_take_precedence() {
        clear_env();
        std::env::set_var("OPS_PSSH_LOGGING__LEVEL", "warn");

        let config = AppConfig::load(vec![
            ("logging.level", Value::from("debug")),
            ("dispatch.max_concurrency", Value::from(4u64)),
        ])
        .unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.dispatch.max_concurrency, 4);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_validation_invalid_log_level() {
        clear_env();
        std::env::set_var("OPS_PSSH_LOGGING__LEVEL", "invalid");

        assert!(AppConfig::from_env().is_err());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_validation_invalid_log_format() {
        clear_env();
        std::env::set_var("OPS_PSSH_LOGGING__FORMAT", "xml");

        assert!(AppConfig::from_env().is_err());

        clear_env();
    }
}
