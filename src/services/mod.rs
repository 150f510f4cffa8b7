//! 子命令业务逻辑

pub mod exec_service;
pub mod ping_service;

pub use exec_service::{CommandRunner, ExecService, SshRunner};
pub use ping_service::{PingService, ReachabilityProbe, SshProbe};

use common::ssh::Host;

/// ls：目标主机名列表（保持目标顺序）
pub fn list_hosts(hosts: &[Host]) -> Vec<String> {
    hosts.iter().map(|h| h.hostname.clone()).collect()
}
