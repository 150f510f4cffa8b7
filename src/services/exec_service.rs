//! 批量命令执行服务

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use common::execution::ExecutionResult;
use common::{ssh::Host, AppError};

use crate::concurrency::{DispatchError, Dispatcher};
use crate::ssh::{execute_on_host, SshSettings};

/// 单主机命令执行器
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, host: Host, command: Arc<str>) -> ExecutionResult;
}

/// 基于 SSH 的执行器
pub struct SshRunner {
    settings: SshSettings,
}

impl SshRunner {
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl CommandRunner for SshRunner {
    async fn run(&self, host: Host, command: Arc<str>) -> ExecutionResult {
        execute_on_host(host, command, self.settings.clone()).await
    }
}

/// 批量执行服务
pub struct ExecService<R> {
    runner: Arc<R>,
    dispatcher: Dispatcher,
}

impl<R: CommandRunner + 'static> ExecService<R> {
    pub fn new(runner: R, dispatcher: Dispatcher) -> Self {
        Self {
            runner: Arc::new(runner),
            dispatcher,
        }
    }

    /// 在所有目标主机上执行命令，结果按目标顺序返回
    pub async fn exec(&self, hosts: Vec<Host>, command: &str) -> Vec<ExecutionResult> {
        let names: Vec<String> = hosts.iter().map(|h| h.hostname.clone()).collect();
        let command: Arc<str> = Arc::from(command);

        let runner = Arc::clone(&self.runner);
        let outcomes = self
            .dispatcher
            .dispatch(
                move |host: Host| {
                    let runner = Arc::clone(&runner);
                    let command = Arc::clone(&command);
                    async move { runner.run(host, command).await }
                },
                hosts,
            )
            .await;

        let mut slots: Vec<Option<ExecutionResult>> = vec![None; names.len()];
        for outcome in outcomes {
            let hostname = &names[outcome.index];
            let result = outcome
                .result
                .unwrap_or_else(|e| dispatch_failure(hostname, e));
            info!(
                hostname = %hostname,
                status = ?result.status(),
                summary = %result.output_summary(80),
                "Host finished"
            );
            slots[outcome.index] = Some(result);
        }

        slots
            .into_iter()
            .zip(&names)
            .map(|(slot, hostname)| {
                slot.unwrap_or_else(|| {
                    ExecutionResult::failure(
                        hostname,
                        AppError::Internal("task result lost".to_string()),
                        None,
                        0.0,
                    )
                })
            })
            .collect()
    }
}

/// 把分发层错误转换为该主机的失败结果
fn dispatch_failure(hostname: &str, error: DispatchError) -> ExecutionResult {
    match error {
        DispatchError::TimedOut(limit) => {
            ExecutionResult::timeout(hostname, None, limit.as_secs_f64())
        }
        other => {
            ExecutionResult::failure(hostname, AppError::Internal(other.to_string()), None, 0.0)
        }
    }
}
