//! 交互式输出读取
//!
//! 逐块读取通道输出，按行重组并实时记录日志；主机开启 sudo 时，
//! 在第一次出现 `[sudo] ` 提示的数据块上回填密码（只回填一次）

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

use common::{ssh::Host, AppError, Result};

use super::lines::LineBuffer;

/// sudo 密码提示标记
static SUDO_PROMPT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[sudo\] ").expect("valid regex"));

/// 通道事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// 一块输出数据
    Data(Vec<u8>),
    /// 远端退出码
    ExitStatus(u32),
}

/// 交互式 shell 通道
#[async_trait]
pub trait ShellChannel: Send {
    /// 等待下一个事件，通道关闭时返回 None
    async fn recv(&mut self) -> Result<Option<ChannelEvent>>;

    /// 向通道写入数据
    async fn send(&mut self, data: &[u8]) -> Result<()>;
}

/// 读取通道直到关闭，每一行追加到 `lines` 并记录日志，返回远端退出码
///
/// 出错时已读取的行保留在 `lines` 中
pub async fn stream_output<C: ShellChannel + ?Sized>(
    channel: &mut C,
    host: &Host,
    read_timeout: Option<Duration>,
    lines: &mut Vec<String>,
) -> Result<Option<u32>> {
    let mut buffer = LineBuffer::new();
    let mut awaiting_prompt = host.use_privilege_escalation;
    let mut exit_status = None;

    loop {
        let event = match read_timeout {
            Some(limit) => timeout(limit, channel.recv()).await.map_err(|_| {
                AppError::Timeout(format!("no output from {} for {:?}", host.hostname, limit))
            })??,
            None => channel.recv().await?,
        };

        let chunk = match event {
            None => break,
            Some(ChannelEvent::ExitStatus(code)) => {
                exit_status = Some(code);
                continue;
            }
            Some(ChannelEvent::Data(chunk)) => chunk,
        };

        if awaiting_prompt {
            let text = String::from_utf8_lossy(&chunk);
            if let Some(found) = SUDO_PROMPT.find(&text) {
                let password = host.escalation_password().ok_or_else(|| {
                    AppError::SshAuthenticationError(
                        "sudo prompted for a password but none is configured".to_string(),
                    )
                })?;

                for line in buffer.push(text[..found.start()].as_bytes()) {
                    emit(line, lines);
                }
                channel.send(format!("{}\n", password).as_bytes()).await?;
                awaiting_prompt = false;
                debug!("Answered sudo password prompt");
                continue;
            }
        }

        for line in buffer.push(&chunk) {
            emit(line, lines);
        }
    }

    if let Some(line) = buffer.finish() {
        emit(line, lines);
    }

    Ok(exit_status)
}

fn emit(line: String, lines: &mut Vec<String>) {
    info!("{}", line);
    lines.push(line);
}
