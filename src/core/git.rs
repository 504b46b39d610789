//! Git 模式比较
//!
//! 不做文件级扫描，直接比较本地与远程仓库最新提交的时间戳。
//! 哈希只用于展示与日志，不参与判定。Git 模式是全有或全无的：
//! 任一侧查询失败即整体失败，绝不回退到文件级比较。

use crate::core::comparator::{ComparisonResult, Recommendation};
use crate::error::{Result, SyncError};
use crate::remote::shell::{shell_quote, CommandChannel};
use std::process::Stdio;
use tracing::{debug, info, warn};

/// 远程 git 可执行文件的候选位置，按顺序尝试
pub const REMOTE_GIT_CANDIDATES: &[&str] = &[
    "git",
    "/usr/bin/git",
    "/usr/local/bin/git",
    "/opt/homebrew/bin/git",
];

/// 仓库最新提交的摘要
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub hash: String,
    /// 提交时间（UTC 秒）
    pub timestamp: i64,
}

/// Git 模式比较器
pub struct GitComparator;

impl GitComparator {
    /// 比较本地仓库与远程仓库的最新提交，按时间戳给出推荐
    pub async fn compare(
        local_repo: &str,
        remote_path: &str,
        channel: &dyn CommandChannel,
    ) -> Result<ComparisonResult> {
        let local = Self::local_head(local_repo).await?;
        let remote = Self::remote_head(remote_path, channel).await?;

        info!(
            "Git 比较: 本地 {} ({}), 远程 {} ({})",
            &local.hash[..local.hash.len().min(8)],
            local.timestamp,
            &remote.hash[..remote.hash.len().min(8)],
            remote.timestamp
        );

        let recommendation = match local.timestamp.cmp(&remote.timestamp) {
            std::cmp::Ordering::Greater => Recommendation::SyncToRemote,
            std::cmp::Ordering::Less => Recommendation::SyncToLocal,
            std::cmp::Ordering::Equal => Recommendation::InSync,
        };

        Ok(ComparisonResult::decided(recommendation))
    }

    /// 查询本地仓库的最新提交
    pub async fn local_head(local_repo: &str) -> Result<CommitInfo> {
        let output = tokio::process::Command::new("git")
            .arg("-C")
            .arg(local_repo)
            .arg("log")
            .arg("-1")
            .arg("--format=%H|%ct")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| SyncError::Git(format!("无法启动本地 git: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("not a git repository") {
                return Err(SyncError::Git(format!(
                    "本地路径不是 Git 仓库: {}",
                    local_repo
                )));
            }
            return Err(SyncError::Git(format!(
                "本地提交查询失败: {}",
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Self::parse_head_line(&stdout)
            .ok_or_else(|| SyncError::Git(format!("无法解析本地提交信息: {}", stdout.trim())))
    }

    /// 查询远程仓库的最新提交
    ///
    /// 依次尝试候选 git 路径；配置的远程路径可能是仓库的子目录，
    /// 先解析出仓库根再查询。检测到所有权告警时直接失败并给出
    /// 需要在远程执行的修复命令。
    pub async fn remote_head(
        remote_path: &str,
        channel: &dyn CommandChannel,
    ) -> Result<CommitInfo> {
        let mut last_error = String::new();

        for git in REMOTE_GIT_CANDIDATES {
            let toplevel_cmd = format!(
                "{} -C {} rev-parse --show-toplevel",
                git,
                shell_quote(remote_path)
            );

            let output = match channel.run(&toplevel_cmd).await {
                Ok(o) => o,
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };

            if !output.success() {
                if let Some(remedy) = Self::ownership_remedy(&output.stderr) {
                    return Err(SyncError::Git(remedy));
                }
                debug!("候选 {} 查询失败: {}", git, output.stderr.trim());
                last_error = output.stderr.trim().to_string();
                continue;
            }

            let toplevel = output.stdout.trim().to_string();
            if toplevel.is_empty() {
                last_error = "仓库根解析为空".to_string();
                continue;
            }

            let log_cmd = format!(
                "{} -C {} log -1 --format='%H|%ct'",
                git,
                shell_quote(&toplevel)
            );
            let output = channel
                .run(&log_cmd)
                .await
                .map_err(|e| SyncError::Git(format!("远程提交查询失败: {}", e)))?;

            if !output.success() {
                if let Some(remedy) = Self::ownership_remedy(&output.stderr) {
                    return Err(SyncError::Git(remedy));
                }
                last_error = output.stderr.trim().to_string();
                continue;
            }

            if let Some(info) = Self::parse_head_line(&output.stdout) {
                return Ok(info);
            }
            last_error = format!("无法解析远程提交信息: {}", output.stdout.trim());
        }

        warn!("所有候选 git 路径均失败: {}", last_error);
        Err(SyncError::Git(format!(
            "远程仓库查询失败（已尝试 {} 个 git 路径）: {}",
            REMOTE_GIT_CANDIDATES.len(),
            last_error
        )))
    }

    /// 解析 `%H|%ct` 格式的一行输出
    fn parse_head_line(stdout: &str) -> Option<CommitInfo> {
        let line = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
        let (hash, timestamp) = line.split_once('|')?;
        let hash = hash.trim();
        if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let timestamp = timestamp.trim().parse::<i64>().ok()?;
        Some(CommitInfo {
            hash: hash.to_string(),
            timestamp,
        })
    }

    /// 识别远程仓库的所有权告警，给出可直接执行的修复命令
    fn ownership_remedy(stderr: &str) -> Option<String> {
        if !stderr.contains("dubious ownership") {
            return None;
        }

        // git 的报错形如: detected dubious ownership in repository at '/srv/repo'
        let repo_path = stderr
            .split_once("repository at '")
            .and_then(|(_, rest)| rest.split_once('\''))
            .map(|(path, _)| path.to_string());

        let path = repo_path.unwrap_or_else(|| "<仓库路径>".to_string());
        Some(format!(
            "远程仓库所有权校验失败，请在远程主机执行: git config --global --add safe.directory {}",
            path
        ))
    }
}
