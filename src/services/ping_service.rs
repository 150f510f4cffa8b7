//! 连通性检测服务
//!
//! 两个阶段：先对所有目标做 TCP 端口探测，再对通过的主机建立完整的 SSH 会话并认证。
//! 两个阶段都通过的主机记为 working_host，其余记为 non_working_host，均保持目标顺序

use async_trait::async_trait;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{error, info};

use common::{ssh::Host, AppError};

use crate::concurrency::{DispatchError, Dispatcher};
use crate::output::PingReport;
use crate::ssh::{SSHClient, SshSettings};

/// 可达性探测
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// TCP 端口探测
    async fn tcp_probe(&self, host: &Host) -> Result<(), AppError>;

    /// 完整会话探测（握手 + 认证）
    async fn session_probe(&self, host: &Host) -> Result<(), AppError>;
}

/// 基于 SSH 的探测实现
pub struct SshProbe {
    settings: SshSettings,
}

impl SshProbe {
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ReachabilityProbe for SshProbe {
    async fn tcp_probe(&self, host: &Host) -> Result<(), AppError> {
        timeout(
            host.connect_timeout(),
            TcpStream::connect((host.hostname.as_str(), host.port)),
        )
        .await
        .map_err(|_| {
            AppError::NetworkError(format!("connect to {}:{} timed out", host.hostname, host.port))
        })?
        .map_err(|e| {
            AppError::NetworkError(format!(
                "connect to {}:{} failed: {}",
                host.hostname, host.port, e
            ))
        })?;
        Ok(())
    }

    async fn session_probe(&self, host: &Host) -> Result<(), AppError> {
        SSHClient::new(host.clone(), self.settings.clone()).check().await
    }
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Tcp,
    Session,
}

impl Stage {
    fn name(self) -> &'static str {
        match self {
            Stage::Tcp => "tcp",
            Stage::Session => "session",
        }
    }
}

/// 连通性检测服务
pub struct PingService<P> {
    probe: Arc<P>,
    dispatcher: Dispatcher,
}

impl<P: ReachabilityProbe + 'static> PingService<P> {
    pub fn new(probe: P, dispatcher: Dispatcher) -> Self {
        Self {
            probe: Arc::new(probe),
            dispatcher,
        }
    }

    /// 检测所有目标主机
    pub async fn ping(&self, hosts: &[Host]) -> PingReport {
        let tcp_passed = self.run_stage(Stage::Tcp, hosts.to_vec()).await;

        // 候选主机在目标列表中的位置，同名不同端口的主机分别判定
        let positions: Vec<usize> = tcp_passed
            .iter()
            .enumerate()
            .filter(|(_, passed)| **passed)
            .map(|(i, _)| i)
            .collect();
        let candidates: Vec<Host> = positions.iter().map(|&i| hosts[i].clone()).collect();
        let session_passed = self.run_stage(Stage::Session, candidates).await;

        let mut working = vec![false; hosts.len()];
        for (&i, passed) in positions.iter().zip(session_passed) {
            working[i] = passed;
        }

        let mut report = PingReport::default();
        for (host, ok) in hosts.iter().zip(working) {
            if ok {
                report.working_host.push(host.hostname.clone());
            } else {
                report.non_working_host.push(host.hostname.clone());
            }
        }

        info!(
            working = report.working_host.len(),
            non_working = report.non_working_host.len(),
            "Ping completed"
        );

        report
    }

    /// 执行一个探测阶段，返回与输入对齐的通过标记
    async fn run_stage(&self, stage: Stage, hosts: Vec<Host>) -> Vec<bool> {
        let mut passed = vec![false; hosts.len()];
        let names: Vec<String> = hosts.iter().map(|h| h.hostname.clone()).collect();

        let probe = Arc::clone(&self.probe);
        let outcomes = self
            .dispatcher
            .dispatch(
                move |host: Host| {
                    let probe = Arc::clone(&probe);
                    async move {
                        match stage {
                            Stage::Tcp => probe.tcp_probe(&host).await,
                            Stage::Session => probe.session_probe(&host).await,
                        }
                    }
                },
                hosts,
            )
            .await;

        for outcome in outcomes {
            let hostname = &names[outcome.index];
            match outcome.result {
                Ok(Ok(())) => passed[outcome.index] = true,
                Ok(Err(e)) => error!(
                    hostname = %hostname,
                    stage = stage.name(),
                    error = %e,
                    "Reachability probe failed"
                ),
                Err(e) => log_dispatch_error(hostname, stage, &e),
            }
        }

        passed
    }
}

fn log_dispatch_error(hostname: &str, stage: Stage, error: &DispatchError) {
    error!(
        hostname = %hostname,
        stage = stage.name(),
        error = %error,
        "Reachability probe did not finish"
    );
}
