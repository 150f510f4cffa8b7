//! ops-pssh 主入口

use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use tokio::signal;

use ops_pssh::cli::{self, Cli};
use ops_pssh::concurrency::Dispatcher;
use ops_pssh::config::AppConfig;
use ops_pssh::telemetry;

#[tokio::main]
async fn main() -> ExitCode {
    // 参数错误时 clap 以退出码 2 结束进程
    let args = Cli::parse();

    // 加载 .env 文件（开发环境）
    if let Ok(env) = std::env::var("OPS_PSSH_ENV") {
        dotenv::from_filename(format!(".env.{}", env)).ok();
    }
    dotenv::dotenv().ok();

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Cli) -> anyhow::Result<bool> {
    let config = AppConfig::load(args.config_overrides()).context("failed to load configuration")?;

    telemetry::init_telemetry(&config.logging);

    let dispatcher = Dispatcher::new(config.concurrency());

    // Ctrl-C 取消正在执行的批次，已完成的结果仍会输出
    let cancel = dispatcher.cancellation_token();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling running tasks");
            cancel.cancel();
        }
    });

    let report = cli::run(&args, &config, dispatcher).await?;
    print!("{}", report.body);

    Ok(report.success)
}
