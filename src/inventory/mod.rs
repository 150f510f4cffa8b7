//! 主机清单
//!
//! 从 YAML 文档加载主机模板并展开为具体主机。加载是全有或全无的：
//! 任何一个模板或主机记录出错，整个清单加载失败

mod slice;

pub use slice::{expand_key, find_slices, SliceKind, SliceTemplate};

use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use common::ssh::{Host, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_PORT, DEFAULT_USERNAME};

/// 清单错误
#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("slice error {0}")]
    Slice(String),

    #[error("invalid host entry {key}: {reason}")]
    InvalidHost { key: String, reason: String },

    #[error("inventory keys must be strings, got: {0}")]
    InvalidKey(String),

    #[error("inventory document must be a mapping of host templates")]
    InvalidDocument,

    #[error("failed to read inventory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse inventory: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("unknown target: {0}")]
    UnknownTarget(String),

    #[error("empty target selection")]
    EmptyTarget,
}

/// YAML 中每个模板键对应的原始主机记录
///
/// 所有字段都可省略；空字符串的密码/私钥视为未设置
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostSpec {
    pub hostname: Option<String>,
    pub username: Option<String>,
    pub port: Option<u16>,
    pub password: Option<Secret<String>>,
    #[serde(alias = "private_key_path")]
    pub pkfile: Option<String>,
    #[serde(alias = "private_key_passphrase")]
    pub pkpasswd: Option<Secret<String>>,
    #[serde(alias = "use_privilege_escalation")]
    pub sudo: bool,
    #[serde(alias = "connect_timeout_seconds")]
    pub timeout: Option<f64>,
    pub tags: BTreeMap<String, String>,
}

impl HostSpec {
    /// 构建主机描述，hostname 未设置时使用清单键
    pub fn to_host(&self, key: &str) -> Result<Host, InventoryError> {
        let invalid = |reason: String| InventoryError::InvalidHost {
            key: key.to_string(),
            reason,
        };

        let port = self.port.unwrap_or(DEFAULT_PORT);
        if port == 0 {
            return Err(invalid("port must be between 1 and 65535".to_string()));
        }

        let timeout = self.timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);
        if !timeout.is_finite() || timeout <= 0.0 {
            return Err(invalid(format!("timeout must be a positive number, got {}", timeout)));
        }
        if Duration::try_from_secs_f64(timeout).is_err() {
            return Err(invalid(format!("timeout is too large, got {}", timeout)));
        }

        let hostname = match self.hostname.as_deref() {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => key.to_string(),
        };

        Ok(Host {
            hostname,
            username: self
                .username
                .clone()
                .unwrap_or_else(|| DEFAULT_USERNAME.to_string()),
            port,
            password: non_empty_secret(&self.password),
            private_key_path: self
                .pkfile
                .as_deref()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
            private_key_passphrase: non_empty_secret(&self.pkpasswd),
            use_privilege_escalation: self.sudo,
            connect_timeout_seconds: timeout,
            tags: self.tags.clone(),
        })
    }
}

fn non_empty_secret(secret: &Option<Secret<String>>) -> Option<Secret<String>> {
    secret
        .as_ref()
        .filter(|s| !s.expose_secret().is_empty())
        .cloned()
}

/// 展开后的主机清单，按主机名排序，加载后只读
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    hosts: BTreeMap<String, Host>,
}

impl Inventory {
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Host> {
        self.hosts.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.hosts.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Host)> {
        self.hosts.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// 选择目标主机
    ///
    /// `None` 或 `all` 选择全部主机；否则按逗号分隔，每一项可以是主机名，
    /// 也可以是模板（如 `web[1:4]`）。结果按首次出现的顺序去重
    pub fn select(&self, pattern: Option<&str>) -> Result<Vec<Host>, InventoryError> {
        let pattern = match pattern.map(str::trim) {
            None | Some("all") => return Ok(self.hosts.values().cloned().collect()),
            Some(p) => p,
        };

        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for item in pattern.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            for name in expand_key(item)? {
                let host = self
                    .hosts
                    .get(&name)
                    .ok_or_else(|| InventoryError::UnknownTarget(name.clone()))?;
                if seen.insert(name) {
                    targets.push(host.clone());
                }
            }
        }

        if targets.is_empty() {
            return Err(InventoryError::EmptyTarget);
        }
        Ok(targets)
    }

    fn insert(&mut self, name: String, host: Host) {
        if self.hosts.insert(name.clone(), host).is_some() {
            warn!(host = %name, "Duplicate inventory entry, later definition wins");
        }
    }
}

/// 展开原始清单条目（按文档顺序）
pub fn expand_inventory<I>(entries: I) -> Result<Inventory, InventoryError>
where
    I: IntoIterator<Item = (String, HostSpec)>,
{
    let mut inventory = Inventory::default();

    for (key, spec) in entries {
        let base = spec.to_host(&key)?;

        if find_slices(&key).is_empty() {
            inventory.insert(key, base);
            continue;
        }

        let names = expand_key(&key)?;
        if names.is_empty() {
            warn!(template = %key, "Host template expands to no hosts");
        }
        debug!(template = %key, count = names.len(), "Expanded host template");

        for name in names {
            let host = base.renamed(name.clone());
            inventory.insert(name, host);
        }
    }

    Ok(inventory)
}

/// 解析 YAML 清单文本
pub fn parse_inventory(text: &str) -> Result<Inventory, InventoryError> {
    let document: serde_yaml::Value = serde_yaml::from_str(text)?;
    let mapping = match document {
        serde_yaml::Value::Mapping(mapping) => mapping,
        serde_yaml::Value::Null => return Ok(Inventory::default()),
        _ => return Err(InventoryError::InvalidDocument),
    };

    let mut entries = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
        let key = match key {
            serde_yaml::Value::String(s) => s,
            serde_yaml::Value::Number(n) => n.to_string(),
            other => return Err(InventoryError::InvalidKey(format!("{:?}", other))),
        };
        let spec = if value.is_null() {
            HostSpec::default()
        } else {
            serde_yaml::from_value(value).map_err(|e| InventoryError::InvalidHost {
                key: key.clone(),
                reason: e.to_string(),
            })?
        };
        entries.push((key, spec));
    }

    expand_inventory(entries)
}

/// 从文件加载清单
pub fn load_inventory(path: impl AsRef<Path>) -> Result<Inventory, InventoryError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| InventoryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let inventory = parse_inventory(&text)?;
    debug!(path = %path.display(), hosts = inventory.len(), "Inventory loaded");
    Ok(inventory)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
"web[01:03]":
  username: deploy
  password: secret
  sudo: true
  tags:
    role: web
"node[a:d]":
  port: 2222
  pkfile: /home/ops/.ssh/id_ed25519
db.internal:
  hostname: 10.0.0.5
  timeout: 2.5
bastion:
"#;

    #[test]
    fn test_parse_sample() {
        let inventory = parse_inventory(SAMPLE).unwrap();
        let names: Vec<&str> = inventory.names().collect();
        assert_eq!(
            names,
            vec!["bastion", "db.internal", "nodea", "nodeb", "nodec", "web1", "web2"]
        );

        let web1 = inventory.get("web1").unwrap();
        assert_eq!(web1.hostname, "web1");
        assert_eq!(web1.username, "deploy");
        assert!(web1.use_privilege_escalation);
        assert_eq!(web1.escalation_password(), Some("secret"));
        assert_eq!(web1.tags.get("role").map(String::as_str), Some("web"));

        let nodeb = inventory.get("nodeb").unwrap();
        assert_eq!(nodeb.hostname, "nodeb");
        assert_eq!(nodeb.port, 2222);
        assert!(nodeb.password.is_none());
        assert!(nodeb.private_key_path.is_some());
    }

    #[test]
    fn test_plain_key_yields_single_entry() {
        let inventory = parse_inventory(SAMPLE).unwrap();
        let db = inventory.get("db.internal").unwrap();
        assert_eq!(db.hostname, "10.0.0.5");
        assert_eq!(db.connect_timeout_seconds, 2.5);

        let bastion = inventory.get("bastion").unwrap();
        assert_eq!(bastion.hostname, "bastion");
        assert_eq!(bastion.username, "root");
        assert_eq!(bastion.port, 22);
    }

    #[test]
    fn test_template_overrides_hostname() {
        let inventory = parse_inventory("\"web[1:3]\":\n  hostname: ignored\n").unwrap();
        assert_eq!(inventory.get("web1").unwrap().hostname, "web1");
        assert_eq!(inventory.get("web2").unwrap().hostname, "web2");
    }

    #[test]
    fn test_bad_slice_fails_whole_load() {
        let text = "good1: {}\n\"bad[x:1]\": {}\ngood2: {}\n";
        let err = parse_inventory(text).unwrap_err();
        assert!(matches!(err, InventoryError::Slice(ref t) if t == "[x:1]"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = parse_inventory("web1:\n  passwd: typo\n").unwrap_err();
        assert!(matches!(err, InventoryError::InvalidHost { .. }));
    }

    #[test]
    fn test_invalid_port_and_timeout() {
        assert!(parse_inventory("web1:\n  port: 0\n").is_err());
        assert!(parse_inventory("web1:\n  port: 70000\n").is_err());
        assert!(parse_inventory("web1:\n  timeout: 0\n").is_err());
    }

    #[test]
    fn test_oversized_timeout_rejected() {
        let err = parse_inventory("web1:\n  timeout: 1e30\n").unwrap_err();
        assert!(matches!(err, InventoryError::InvalidHost { ref key, .. } if key == "web1"));
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_empty_credentials_are_absent() {
        let inventory = parse_inventory("web1:\n  password: ''\n  pkfile: ''\n").unwrap();
        let host = inventory.get("web1").unwrap();
        assert!(host.password.is_none());
        assert!(host.private_key_path.is_none());
    }

    #[test]
    fn test_long_field_aliases() {
        let text = "web1:\n  use_privilege_escalation: true\n  connect_timeout_seconds: 3\n";
        let host = parse_inventory(text).unwrap().get("web1").cloned().unwrap();
        assert!(host.use_privilege_escalation);
        assert_eq!(host.connect_timeout_seconds, 3.0);
    }

    #[test]
    fn test_empty_document() {
        assert!(parse_inventory("").unwrap().is_empty());
        assert!(matches!(
            parse_inventory("- a\n- b\n").unwrap_err(),
            InventoryError::InvalidDocument
        ));
    }

    #[test]
    fn test_select_targets() {
        let inventory = parse_inventory(SAMPLE).unwrap();

        assert_eq!(inventory.select(None).unwrap().len(), 7);
        assert_eq!(inventory.select(Some("all")).unwrap().len(), 7);

        let targets = inventory.select(Some("web2, node[a:c], web2")).unwrap();
        let names: Vec<&str> = targets.iter().map(|h| h.hostname.as_str()).collect();
        assert_eq!(names, vec!["web2", "nodea", "nodeb"]);
    }

    #[test]
    fn test_select_unknown_target() {
        let inventory = parse_inventory(SAMPLE).unwrap();
        let err = inventory.select(Some("web9")).unwrap_err();
        assert!(matches!(err, InventoryError::UnknownTarget(ref n) if n == "web9"));
        assert!(matches!(inventory.select(Some(" , ")).unwrap_err(), InventoryError::EmptyTarget));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_inventory("/nonexistent/inventory.yaml").unwrap_err();
        assert!(matches!(err, InventoryError::Io { .. }));
    }
}
