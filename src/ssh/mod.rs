//! SSH 会话
//!
//! executor 负责连接与认证，stream 负责交互式输出读取与 sudo 提示回填

pub mod executor;
pub mod lines;
pub mod stream;

pub use executor::{execute_on_host, SSHClient, SshSettings};
pub use lines::LineBuffer;
pub use stream::{stream_output, ChannelEvent, ShellChannel};
