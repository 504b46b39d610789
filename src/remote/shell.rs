//! 远程命令通道
//!
//! 在远程主机上执行 shell 命令并捕获输出，供远程时钟校正与 Git 模式使用。
//! 默认实现通过系统 ssh 客户端子进程完成，认证方式与 SFTP 数据通道一致
//! （密钥/代理）。并发在途命令数由信号量限制在连接池上限内。

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::config::ConnectionConfig;

/// 连接池上限：同时在途的远程命令数
pub const MAX_POOLED_COMMANDS: usize = 5;

/// 一次远程命令的执行结果
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// 远程命令执行能力的抽象；任何可认证执行命令的实现均可
#[async_trait]
pub trait CommandChannel: Send + Sync {
    async fn run(&self, command: &str) -> Result<CommandOutput>;

    /// 通道名称（用于日志）
    fn name(&self) -> &str;
}

/// 基于系统 ssh 客户端的命令通道
pub struct SshShell {
    target: String,
    port: u16,
    private_key: Option<String>,
    verify_host_key: bool,
    connect_timeout_secs: u64,
    permits: Arc<Semaphore>,
    name: String,
}

impl SshShell {
    pub fn new(connection: &ConnectionConfig) -> Self {
        let target = format!("{}@{}", connection.username, connection.host);
        let name = format!("ssh://{}:{}", target, connection.port);
        Self {
            target,
            port: connection.port,
            private_key: connection.private_key.clone(),
            verify_host_key: connection.verify_host_key,
            connect_timeout_secs: connection.effective_connect_timeout(),
            permits: Arc::new(Semaphore::new(MAX_POOLED_COMMANDS)),
            name,
        }
    }
}

#[async_trait]
impl CommandChannel for SshShell {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        // 每个许可同一时刻只承载一条在途命令
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .context("命令通道已关闭")?;

        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout_secs))
            .arg("-o")
            .arg(if self.verify_host_key {
                "StrictHostKeyChecking=yes"
            } else {
                "StrictHostKeyChecking=accept-new"
            })
            .arg("-p")
            .arg(self.port.to_string());

        if let Some(key) = &self.private_key {
            cmd.arg("-i").arg(key);
        }

        cmd.arg(&self.target)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("执行远程命令: {}", command);

        let output = cmd
            .output()
            .await
            .with_context(|| format!("无法启动 ssh 进程连接 {}", self.name))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 把任意字符串包装成单引号 shell 字面量
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;

    #[test]
    fn test_shell_quote_plain() {
        assert_eq!(shell_quote("a b.txt"), "'a b.txt'");
    }

    #[test]
    fn test_shell_quote_embedded_quote() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_shell_name() {
        let shell = SshShell::new(&ConnectionConfig {
            host: "example.com".to_string(),
            port: 2222,
            username: "sync".to_string(),
            password: None,
            private_key: None,
            verify_host_key: true,
            connect_timeout_secs: 15,
        });
        assert_eq!(shell.name(), "ssh://sync@example.com:2222");
    }

    #[test]
    fn test_command_output_success() {
        let ok = CommandOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
        };
        assert!(ok.success());
        let failed = CommandOutput {
            exit_code: 255,
            ..ok
        };
        assert!(!failed.success());
    }
}
