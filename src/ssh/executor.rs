//! SSH执行器模块
//! 提供SSH连接管理和命令执行能力
//!
//! 使用 russh 建立真实的 SSH 连接，在 pty 中执行命令并实时输出

use async_trait::async_trait;
use russh::client;
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use russh_keys::{check_known_hosts, learn_known_hosts, load_secret_key};
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, info_span, warn, Instrument};

use common::execution::{ExecutionResult, UNKNOWN_RETURN_CODE};
use common::ssh::{Host, HostKeyVerification, SshAuth};
use common::AppError;

use super::stream::{stream_output, ChannelEvent, ShellChannel};

/// 默认 SSH 握手超时（秒）
pub const DEFAULT_BANNER_TIMEOUT_SECS: u64 = 300;

/// pty 参数
const PTY_TERM: &str = "xterm";
const PTY_COLS: u32 = 80;
const PTY_ROWS: u32 = 24;

/// 会话级设置（对所有主机相同）
#[derive(Debug, Clone)]
pub struct SshSettings {
    /// SSH 握手超时
    pub banner_timeout: Duration,
    /// 两次输出之间的最长等待时间，None 表示不限制
    pub read_timeout: Option<Duration>,
    /// 主机密钥验证策略
    pub host_key_verification: HostKeyVerification,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            banner_timeout: Duration::from_secs(DEFAULT_BANNER_TIMEOUT_SECS),
            read_timeout: None,
            host_key_verification: HostKeyVerification::default(),
        }
    }
}

/// SSH客户端
pub struct SSHClient {
    host: Host,
    settings: SshSettings,
}

impl SSHClient {
    pub fn new(host: Host, settings: SshSettings) -> Self {
        Self { host, settings }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    /// 创建带验证策略的会话处理器
    fn create_session(&self) -> SSHSession {
        SSHSession {
            verification_mode: self.settings.host_key_verification,
            host: self.host.hostname.clone(),
            port: self.host.port,
        }
    }

    fn span(&self) -> tracing::Span {
        info_span!(
            "ssh",
            hostname = %self.host.hostname,
            username = %self.host.username,
            port = self.host.port,
            sudo = self.host.use_privilege_escalation,
            tags = %self.host.tags_display(),
        )
    }

    /// 建立 TCP 连接并完成 SSH 握手
    pub async fn connect(&self) -> Result<client::Handle<SSHSession>, AppError> {
        let target = self.host.target();

        let stream = timeout(
            self.host.connect_timeout(),
            TcpStream::connect((self.host.hostname.as_str(), self.host.port)),
        )
        .await
        .map_err(|_| AppError::SshConnectionError(format!("TCP连接超时: {}", target)))?
        .map_err(|e| AppError::SshConnectionError(format!("TCP连接失败: {}: {}", target, e)))?;

        let config = Arc::new(client::Config {
            preferred: russh::Preferred::default(),
            ..Default::default()
        });

        let handle = timeout(
            self.settings.banner_timeout,
            client::connect_stream(config, stream, self.create_session()),
        )
        .await
        .map_err(|_| AppError::SshConnectionError(format!("SSH握手超时: {}", target)))?
        .map_err(|e| match e {
            russh::Error::UnknownKey => {
                AppError::SshConnectionError(format!("主机密钥验证失败: {}", target))
            }
            other => AppError::SshConnectionError(format!("SSH连接失败: {}: {}", target, other)),
        })?;

        debug!("SSH handshake completed");
        Ok(handle)
    }

    /// 依次尝试私钥与密码认证
    pub async fn authenticate(
        &self,
        handle: &mut client::Handle<SSHSession>,
    ) -> Result<(), AppError> {
        let methods = self.host.auth_methods();
        if methods.is_empty() {
            return Err(AppError::SshAuthenticationError(format!(
                "no password or private key configured for {}",
                self.host.hostname
            )));
        }

        for method in methods {
            let accepted = match method {
                SshAuth::Key {
                    private_key_path,
                    passphrase,
                } => {
                    let passphrase = passphrase.as_ref().map(|p| p.expose_secret().as_str());
                    let key = match load_secret_key(&private_key_path, passphrase) {
                        Ok(key) => key,
                        Err(e) => {
                            warn!(path = %private_key_path.display(), error = %e, "加载SSH私钥失败");
                            continue;
                        }
                    };
                    handle
                        .authenticate_publickey(self.host.username.clone(), Arc::new(key))
                        .await
                }
                SshAuth::Password { password } => {
                    handle
                        .authenticate_password(
                            self.host.username.clone(),
                            password.expose_secret().as_str(),
                        )
                        .await
                }
            }
            .map_err(|e| AppError::SshAuthenticationError(format!("SSH认证失败: {}", e)))?;

            if accepted {
                debug!("SSH认证成功");
                return Ok(());
            }
        }

        Err(AppError::SshAuthenticationError(format!(
            "SSH认证失败: {}",
            self.host.target()
        )))
    }

    /// 建立会话并完成认证后立即断开，用于连通性探测
    pub async fn check(&self) -> Result<(), AppError> {
        async {
            let mut handle = self.connect().await?;
            let result = self.authenticate(&mut handle).await;
            let _ = handle.disconnect(Disconnect::ByApplication, "", "").await;
            result
        }
        .instrument(self.span())
        .await
    }

    /// 执行命令
    ///
    /// 所有失败都折叠进返回的 ExecutionResult，失败前已经输出的行保留在结果中
    pub async fn execute(&self, command: &str) -> ExecutionResult {
        let start = Instant::now();

        async {
            info!(command = %command, "Executing SSH command");

            let mut lines = Vec::new();
            let outcome = self.run(command, &mut lines).await;
            let duration_secs = start.elapsed().as_secs_f64();

            match outcome {
                Ok(exit_status) => {
                    let return_code = exit_status.map(|c| c as i32).unwrap_or(UNKNOWN_RETURN_CODE);
                    info!(return_code, duration_secs, lines = lines.len(), "Command executed");
                    ExecutionResult::completed(
                        &self.host.hostname,
                        lines.join("\n"),
                        return_code,
                        duration_secs,
                    )
                }
                Err(e) => {
                    error!(error = %e, duration_secs, "Command failed");
                    let partial = (!lines.is_empty()).then(|| lines.join("\n"));
                    ExecutionResult::failure(&self.host.hostname, e, partial, duration_secs)
                }
            }
        }
        .instrument(self.span())
        .await
    }

    async fn run(&self, command: &str, lines: &mut Vec<String>) -> Result<Option<u32>, AppError> {
        let mut handle = self.connect().await?;
        let result = self.run_session(&mut handle, command, lines).await;
        let _ = handle.disconnect(Disconnect::ByApplication, "", "").await;
        result
    }

    async fn run_session(
        &self,
        handle: &mut client::Handle<SSHSession>,
        command: &str,
        lines: &mut Vec<String>,
    ) -> Result<Option<u32>, AppError> {
        self.authenticate(handle).await?;

        let mut channel = handle.channel_open_session().await.map_err(|e| {
            AppError::SshConnectionError(format!("打开SSH通道失败: {}", e))
        })?;

        channel
            .request_pty(false, PTY_TERM, PTY_COLS, PTY_ROWS, 0, 0, &[])
            .await
            .map_err(|e| AppError::SshExecutionError(format!("请求pty失败: {}", e)))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| AppError::SshExecutionError(format!("执行命令失败: {}", e)))?;

        let mut channel = RusshChannel(channel);
        let result =
            stream_output(&mut channel, &self.host, self.settings.read_timeout, lines).await;
        let _ = channel.0.close().await;
        result
    }
}

/// 在单个主机上执行命令，供分发器直接调用
pub async fn execute_on_host(
    host: Host,
    command: Arc<str>,
    settings: SshSettings,
) -> ExecutionResult {
    SSHClient::new(host, settings).execute(&command).await
}

/// russh 通道适配
struct RusshChannel(Channel<client::Msg>);

#[async_trait]
impl ShellChannel for RusshChannel {
    async fn recv(&mut self) -> Result<Option<ChannelEvent>, AppError> {
        loop {
            match self.0.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    return Ok(Some(ChannelEvent::Data(data.to_vec())))
                }
                // pty 会合并 stderr，这里仍按输出处理
                Some(ChannelMsg::ExtendedData { data, .. }) => {
                    return Ok(Some(ChannelEvent::Data(data.to_vec())))
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    return Ok(Some(ChannelEvent::ExitStatus(exit_status)))
                }
                Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                    warn!(signal = ?signal_name, "Remote process killed by signal");
                }
                Some(ChannelMsg::Close) | None => return Ok(None),
                // Eof 之后仍可能收到退出码，等 Close
                Some(_) => {}
            }
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), AppError> {
        self.0
            .data(data)
            .await
            .map_err(|e| AppError::SshExecutionError(format!("写入SSH通道失败: {}", e)))
    }
}

/// SSH 客户端会话处理器
pub struct SSHSession {
    verification_mode: HostKeyVerification,
    host: String,
    port: u16,
}

#[async_trait]
impl client::Handler for SSHSession {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();

        match self.verification_mode {
            HostKeyVerification::Disabled => {
                warn!(
                    host = %self.host,
                    port = self.port,
                    "Host key verification DISABLED - accepting all keys"
                );
                Ok(true)
            }
            HostKeyVerification::Accept => match check_known_hosts(
                &self.host,
                self.port,
                server_public_key,
            ) {
                Ok(true) => {
                    debug!(fingerprint = %fingerprint, "Host key verified");
                    Ok(true)
                }
                Ok(false) => {
                    info!(fingerprint = %fingerprint, "First time connecting - accepting host key");
                    if let Err(e) = learn_known_hosts(&self.host, self.port, server_public_key) {
                        warn!(error = %e, "Failed to record host key in known_hosts");
                    }
                    Ok(true)
                }
                Err(e) => {
                    error!(
                        fingerprint = %fingerprint,
                        error = %e,
                        "Host key mismatch - POSSIBLE SECURITY BREACH"
                    );
                    Ok(false)
                }
            },
            HostKeyVerification::Strict => match check_known_hosts(
                &self.host,
                self.port,
                server_public_key,
            ) {
                Ok(true) => {
                    debug!(fingerprint = %fingerprint, "Host key verified (strict mode)");
                    Ok(true)
                }
                Ok(false) => {
                    error!(
                        fingerprint = %fingerprint,
                        "Unknown host in strict mode - rejecting connection"
                    );
                    Ok(false)
                }
                Err(e) => {
                    error!(
                        fingerprint = %fingerprint,
                        error = %e,
                        "Host key mismatch - REJECTING CONNECTION"
                    );
                    Ok(false)
                }
            },
        }
    }
}
