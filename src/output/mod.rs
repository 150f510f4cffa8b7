//! 报告渲染模块
//! 各子命令的结果统一序列化为 YAML（默认）或 JSON 写到 stdout

use serde::Serialize;

use common::execution::{ExecutionResult, ExecutionStatistics, ExecutionStatus, FailureReason};

/// 报告格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

/// 渲染错误
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("failed to render YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to render JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// 将报告渲染为文本
pub fn render<T: Serialize + ?Sized>(
    report: &T,
    format: OutputFormat,
) -> Result<String, OutputError> {
    Ok(match format {
        OutputFormat::Yaml => serde_yaml::to_string(report)?,
        OutputFormat::Json => {
            let mut text = serde_json::to_string_pretty(report)?;
            text.push('\n');
            text
        }
    })
}

/// ping 报告
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PingReport {
    /// 两个阶段都通过的主机
    pub working_host: Vec<String>,
    /// 任一阶段失败的主机
    pub non_working_host: Vec<String>,
}

/// 单主机执行报告
#[derive(Debug, Clone, Serialize)]
pub struct HostReport {
    pub host: String,
    pub status: ExecutionStatus,
    pub return_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_secs: f64,
}

impl From<&ExecutionResult> for HostReport {
    fn from(result: &ExecutionResult) -> Self {
        Self {
            host: result.host.clone(),
            status: result.status(),
            return_code: result.return_code,
            failure_reason: FailureReason::classify(result),
            output: result.stdout.clone().filter(|s| !s.is_empty()),
            error: result.error.as_ref().map(|e| e.to_string()),
            duration_secs: (result.duration_secs * 1000.0).round() / 1000.0,
        }
    }
}

/// exec 报告
#[derive(Debug, Clone, Serialize)]
pub struct ExecReport {
    pub hosts: Vec<HostReport>,
    pub statistics: ExecutionStatistics,
}

impl ExecReport {
    pub fn from_results(results: &[ExecutionResult]) -> Self {
        Self {
            hosts: results.iter().map(HostReport::from).collect(),
            statistics: ExecutionStatistics::from_results(results),
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.statistics.all_succeeded()
    }
}

/// version 报告
#[derive(Debug, Clone, Serialize)]
pub struct VersionReport {
    pub version: &'static str,
    pub repository: &'static str,
    pub os: &'static str,
    pub arch: &'static str,
}

impl VersionReport {
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            repository: env!("CARGO_PKG_REPOSITORY"),
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
        }
    }
}
