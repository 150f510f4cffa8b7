//! 命令行定义与子命令调度

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::Value;
use std::path::PathBuf;

use crate::concurrency::Dispatcher;
use crate::config::AppConfig;
use crate::inventory::load_inventory;
use crate::output::{render, ExecReport, OutputFormat, VersionReport};
use crate::services::{list_hosts, ExecService, PingService, SshProbe, SshRunner};
use common::ssh::Host;

#[derive(Debug, Parser)]
#[command(name = "ops-pssh", version, about = "Run commands over SSH on many hosts in parallel")]
pub struct Cli {
    /// Inventory 文件路径
    #[arg(short = 'i', long)]
    pub inventory: Option<PathBuf>,

    /// 日志级别
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// 目标主机：all、主机名或模板，多个用逗号分隔
    #[arg(short = 't', long)]
    pub target: Option<String>,

    /// 报告格式
    #[arg(short = 'o', long, value_enum, default_value_t = OutputFormat::Yaml)]
    pub output: OutputFormat,

    /// 最大并发主机数（0 表示不限制）
    #[arg(short = 'c', long)]
    pub concurrency: Option<u64>,

    /// 单主机超时（秒，0 表示不限制）
    #[arg(long = "task-timeout")]
    pub task_timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// 列出目标主机
    Ls,
    /// 检测目标主机的连通性
    Ping,
    /// 在目标主机上执行命令
    Exec {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// 显示版本信息
    Version,
}

impl Cli {
    /// 命令行参数对应的配置覆盖项
    pub fn config_overrides(&self) -> Vec<(&'static str, Value)> {
        let mut overrides = Vec::new();
        if let Some(path) = &self.inventory {
            overrides.push(("inventory.path", Value::from(path.to_string_lossy().into_owned())));
        }
        if let Some(level) = &self.log_level {
            overrides.push(("logging.level", Value::from(level.clone())));
        }
        if let Some(limit) = self.concurrency {
            overrides.push(("dispatch.max_concurrency", Value::from(limit)));
        }
        if let Some(secs) = self.task_timeout {
            overrides.push(("dispatch.task_timeout_secs", Value::from(secs)));
        }
        overrides
    }
}

/// 子命令输出
#[derive(Debug)]
pub struct Report {
    /// 渲染后的报告文本
    pub body: String,
    /// 为 false 时进程以非零码退出
    pub success: bool,
}

/// 执行子命令
pub async fn run(cli: &Cli, config: &AppConfig, dispatcher: Dispatcher) -> anyhow::Result<Report> {
    let (body, success) = match &cli.command {
        Command::Version => (render(&VersionReport::current(), cli.output)?, true),
        Command::Ls => {
            let targets = load_targets(cli, config)?;
            (render(&list_hosts(&targets), cli.output)?, true)
        }
        Command::Ping => {
            let targets = load_targets(cli, config)?;
            let service = PingService::new(SshProbe::new(config.ssh_settings()), dispatcher);
            let report = service.ping(&targets).await;
            (render(&report, cli.output)?, true)
        }
        Command::Exec { command } => {
            let targets = load_targets(cli, config)?;
            let command = command.join(" ");
            let service = ExecService::new(SshRunner::new(config.ssh_settings()), dispatcher);
            let results = service.exec(targets, &command).await;
            let report = ExecReport::from_results(&results);

            tracing::info!(
                total = report.statistics.total,
                succeeded = report.statistics.succeeded,
                failed = report.statistics.failed,
                timed_out = report.statistics.timed_out,
                "Execution finished"
            );
            (render(&report, cli.output)?, report.all_succeeded())
        }
    };

    Ok(Report { body, success })
}

fn load_targets(cli: &Cli, config: &AppConfig) -> anyhow::Result<Vec<Host>> {
    let path = &config.inventory.path;
    let inventory = load_inventory(path)
        .with_context(|| format!("failed to load inventory {}", path.display()))?;
    let targets = inventory
        .select(cli.target.as_deref())
        .context("invalid target selection")?;
    tracing::debug!(targets = targets.len(), "Targets selected");
    Ok(targets)
}
