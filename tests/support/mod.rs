//! 测试公共模块
//! 提供临时清单文件、测试配置与本地 TCP 服务

#![allow(dead_code)]

use std::path::PathBuf;

use ops_pssh::HostKeyVerification;
use ops_pssh::config::{AppConfig, DispatchConfig, InventoryConfig, LoggingConfig, SshConfig};
use tokio::net::TcpListener;

/// 把清单写入临时文件
pub fn write_inventory(text: &str) -> PathBuf {
    let name = format!("ops-pssh-inventory-{}.yaml", uuid::Uuid::new_v4());
    let path = std::env::temp_dir().join(name);
    std::fs::write(&path, text).expect("Failed to write inventory");
    path
}

/// 创建测试配置
pub fn create_test_config(inventory: PathBuf) -> AppConfig {
    AppConfig {
        inventory: InventoryConfig { path: inventory },
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: "compact".to_string(),
        },
        dispatch: DispatchConfig {
            max_concurrency: 4,
            task_timeout_secs: 10,
        },
        ssh: SshConfig {
            banner_timeout_secs: 2,
            read_timeout_secs: 2,
            host_key_verification: HostKeyVerification::Disabled,
        },
    }
}

/// 返回一个当前没有监听者的本地端口
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    port
}

/// 接受连接后立即关闭的本地服务：TCP 探测能通过，SSH 握手失败
pub async fn spawn_dropping_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
    let port = listener.local_addr().expect("local addr").port();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            drop(socket);
        }
    });
    port
}
