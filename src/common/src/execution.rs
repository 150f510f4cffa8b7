//! 统一执行结果模型
//!
//! 每个分发出去的主机任务恰好产生一个 ExecutionResult，创建后不再修改。
//! 结果按完成顺序返回，因此主机标识直接保存在结果内部

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// 远端未上报退出码时使用的返回码
pub const UNKNOWN_RETURN_CODE: i32 = -1;

/// 超时退出码（与 coreutils timeout 一致）
pub const TIMEOUT_RETURN_CODE: i32 = 124;

/// 执行结果
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// 主机名（Inventory 中展开后的名称）
    pub host: String,

    /// 标准输出（pty 模式下包含合并后的 stderr）
    pub stdout: Option<String>,

    /// 标准错误
    pub stderr: Option<String>,

    /// 退出码
    pub return_code: i32,

    /// 会话失败原因；命令本身以非零码退出时为 None
    pub error: Option<AppError>,

    /// 原始输出内容
    pub content: Option<String>,

    /// 执行时长（秒）
    pub duration_secs: f64,

    /// 是否超时
    pub timed_out: bool,
}

/// 结果状态（带标签的成功/失败/超时）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// 成功
    Succeeded,
    /// 失败
    Failed,
    /// 超时
    TimedOut,
}

impl ExecutionResult {
    /// 创建成功结果（会话正常结束，return_code 由远端给出）
    pub fn completed(
        host: impl Into<String>,
        output: String,
        return_code: i32,
        duration_secs: f64,
    ) -> Self {
        Self {
            host: host.into(),
            stdout: Some(output.clone()),
            stderr: None,
            return_code,
            error: None,
            content: Some(output),
            duration_secs,
            timed_out: false,
        }
    }

    /// 创建成功结果
    pub fn success(host: impl Into<String>, output: String, duration_secs: f64) -> Self {
        Self::completed(host, output, 0, duration_secs)
    }

    /// 创建失败结果，partial_output 为失败前已经收集到的输出
    pub fn failure(
        host: impl Into<String>,
        error: AppError,
        partial_output: Option<String>,
        duration_secs: f64,
    ) -> Self {
        let timed_out = error.is_timeout();
        Self {
            host: host.into(),
            stdout: partial_output.clone(),
            stderr: Some(error.to_string()),
            return_code: if timed_out { TIMEOUT_RETURN_CODE } else { UNKNOWN_RETURN_CODE },
            error: Some(error),
            content: partial_output,
            duration_secs,
            timed_out,
        }
    }

    /// 创建超时结果
    pub fn timeout(
        host: impl Into<String>,
        partial_output: Option<String>,
        duration_secs: f64,
    ) -> Self {
        Self::failure(
            host,
            AppError::Timeout("Execution timed out".to_string()),
            partial_output,
            duration_secs,
        )
    }

    /// 结果状态
    pub fn status(&self) -> ExecutionStatus {
        if self.timed_out {
            ExecutionStatus::TimedOut
        } else if self.error.is_none() && self.return_code == 0 {
            ExecutionStatus::Succeeded
        } else {
            ExecutionStatus::Failed
        }
    }

    /// 判断是否成功
    pub fn is_success(&self) -> bool {
        self.status() == ExecutionStatus::Succeeded
    }

    /// 判断是否失败
    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    /// 获取完整输出（stdout + stderr）
    pub fn full_output(&self) -> String {
        let stdout = self.stdout.as_deref().unwrap_or_default();
        let stderr = self.stderr.as_deref().unwrap_or_default();
        format!("{}\n{}", stdout, stderr).trim().to_string()
    }

    /// 获取输出摘要（限制长度，按字符截断）
    pub fn output_summary(&self, max_len: usize) -> String {
        let full = self.full_output();
        if full.chars().count() <= max_len {
            full
        } else {
            let truncated: String = full.chars().take(max_len).collect();
            format!("{}...", truncated)
        }
    }
}

/// 失败原因分类
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// 网络错误
    NetworkError,
    /// 认证失败
    AuthFailed,
    /// 超时
    Timeout,
    /// 命令执行失败（非零退出码）
    CommandFailed,
    /// 未知错误
    Unknown,
}

impl FailureReason {
    /// 从执行结果推断失败原因，成功结果返回 None
    pub fn classify(result: &ExecutionResult) -> Option<Self> {
        if result.is_success() {
            return None;
        }
        if result.timed_out {
            return Some(Self::Timeout);
        }
        Some(match &result.error {
            None => Self::CommandFailed,
            Some(AppError::SshAuthenticationError(_)) => Self::AuthFailed,
            Some(AppError::SshConnectionError(_)) | Some(AppError::NetworkError(_)) => {
                Self::NetworkError
            }
            Some(AppError::Timeout(_)) => Self::Timeout,
            Some(_) => Self::Unknown,
        })
    }
}

/// 一次批量执行的统计
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionStatistics {
    /// 总主机数
    pub total: usize,
    /// 成功数
    pub succeeded: usize,
    /// 失败数
    pub failed: usize,
    /// 超时数
    pub timed_out: usize,
}

impl ExecutionStatistics {
    /// 从一组结果统计
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a ExecutionResult>) -> Self {
        let mut stats = Self::default();
        for result in results {
            stats.record(result);
        }
        stats
    }

    /// 记录一个结果
    pub fn record(&mut self, result: &ExecutionResult) {
        self.total += 1;
        match result.status() {
            ExecutionStatus::Succeeded => self.succeeded += 1,
            ExecutionStatus::Failed => self.failed += 1,
            ExecutionStatus::TimedOut => self.timed_out += 1,
        }
    }

    /// 是否全部成功
    pub fn all_succeeded(&self) -> bool {
        self.succeeded == self.total
    }
}
