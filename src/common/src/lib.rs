//! ops-pssh 与各执行器共享的基础类型

pub mod error;
pub mod execution;
pub mod ssh;

pub use error::{AppError, Result};
pub use execution::{ExecutionResult, ExecutionStatistics, ExecutionStatus, FailureReason};
pub use ssh::{Host, HostKeyVerification, SshAuth};
