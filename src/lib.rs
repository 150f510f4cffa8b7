//! ops-pssh
//! 基于主机清单的并行 SSH 执行工具

pub mod cli;
pub mod concurrency;
pub mod config;
pub mod inventory;
pub mod output;
pub mod services;
pub mod ssh;
pub mod telemetry;

pub use common::{
    AppError, ExecutionResult, ExecutionStatistics, ExecutionStatus, FailureReason, Host,
    HostKeyVerification,
};
