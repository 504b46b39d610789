use super::{FileInfo, FileMeta, Storage};
use crate::config::ConnectionConfig;
use crate::remote::shell::{shell_quote, CommandChannel};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::TryStreamExt;
use opendal::{Metakey, Operator};
use std::collections::VecDeque;
use std::sync::Arc;

pub struct SftpStorage {
    operator: Operator,
    /// 远程根目录（绝对路径），用于 shell 命令寻址
    root: String,
    /// 远程修改时间回写通道；缺失时 set_modified 退化为空操作
    shell: Option<Arc<dyn CommandChannel>>,
    name: String,
}

impl SftpStorage {
    pub fn new(
        connection: &ConnectionConfig,
        root: &str,
        shell: Option<Arc<dyn CommandChannel>>,
    ) -> Result<Self> {
        use opendal::services::Sftp;

        let endpoint = format!("ssh://{}:{}", connection.host, connection.port);
        let mut builder = Sftp::default()
            .endpoint(&endpoint)
            .user(&connection.username)
            .root(root)
            .known_hosts_strategy(if connection.verify_host_key {
                "strict"
            } else {
                "accept"
            });

        if let Some(key) = &connection.private_key {
            builder = builder.key(key);
        }

        let operator = Operator::new(builder)?.finish();

        let name = format!(
            "sftp://{}@{}:{}{}",
            connection.username,
            connection.host,
            connection.port,
            root
        );

        Ok(Self {
            operator,
            root: root.trim_end_matches('/').to_string(),
            shell,
            name,
        })
    }

    /// 拼出远程绝对路径（供 shell 命令使用）
    fn absolute_path(&self, path: &str) -> String {
        format!("{}/{}", self.root, path.trim_start_matches('/'))
    }

    fn entry_to_info(path: &str, meta: &opendal::Metadata) -> Option<FileInfo> {
        let trimmed = path.trim_start_matches('/').trim_end_matches('/');
        if trimmed.is_empty() {
            return None;
        }
        Some(FileInfo {
            path: trimmed.to_string(),
            size: meta.content_length(),
            modified_time: meta.last_modified().map_or(0, |t| t.timestamp()),
            is_dir: meta.is_dir(),
        })
    }

    /// 完整递归列举
    async fn list_recursive(&self, path: &str) -> Result<Vec<FileInfo>> {
        let mut files = Vec::new();

        let mut lister = self
            .operator
            .lister_with(path)
            .recursive(true)
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode)
            .await?;

        while let Some(entry) = lister.try_next().await? {
            if let Some(info) = Self::entry_to_info(entry.path(), entry.metadata()) {
                files.push(info);
            }
        }

        Ok(files)
    }

    /// 逐层广度优先列举，层数受 max_depth 限制
    async fn list_capped(&self, path: &str, max_depth: usize) -> Result<Vec<FileInfo>> {
        let mut files = Vec::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        queue.push_back((path.to_string(), 0));

        while let Some((dir, depth)) = queue.pop_front() {
            let mut lister = self
                .operator
                .lister_with(&dir)
                .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode)
                .await?;

            while let Some(entry) = lister.try_next().await? {
                let meta = entry.metadata();
                let Some(info) = Self::entry_to_info(entry.path(), meta) else {
                    continue;
                };

                if meta.is_dir() && depth + 1 < max_depth {
                    queue.push_back((entry.path().to_string(), depth + 1));
                }
                files.push(info);
            }
        }

        Ok(files)
    }
}

#[async_trait]
impl Storage for SftpStorage {
    async fn list_files(
        &self,
        prefix: Option<&str>,
        max_depth: Option<usize>,
    ) -> Result<Vec<FileInfo>> {
        let path = prefix.unwrap_or("");

        // 根目录不可达（连接失败/目录不存在）直接报错，不返回空列表
        match self.operator.stat("/").await {
            Ok(_) => {}
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => {
                anyhow::bail!("远程目录不存在: {}", self.root);
            }
            Err(e) => {
                anyhow::bail!("远程连接失败: {}", e);
            }
        }

        match max_depth {
            Some(depth) if depth > 0 => self.list_capped(path, depth).await,
            _ => self.list_recursive(path).await,
        }
    }

    async fn stat(&self, path: &str) -> Result<Option<FileMeta>> {
        match self.operator.stat(path).await {
            Ok(meta) => Ok(Some(FileMeta {
                size: meta.content_length(),
                modified_time: meta.last_modified().map_or(0, |t| t.timestamp()),
                is_dir: meta.is_dir(),
            })),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let data = self.operator.read(path).await?;
        Ok(data.to_vec())
    }

    async fn write(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let path = path.trim_start_matches('/');

        // 逐级创建父目录（可能已存在，忽略错误）
        if let Some(parent) = std::path::Path::new(path).parent() {
            let parent_str = parent.to_string_lossy().replace('\\', "/");
            if !parent_str.is_empty() && parent_str != "." {
                let mut current = String::new();
                for part in parent_str.split('/').filter(|s| !s.is_empty()) {
                    current.push_str(part);
                    current.push('/');
                    let _ = self.operator.create_dir(&current).await;
                }
            }
        }

        self.operator.write(path, data).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        match self.operator.delete(path).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_modified(&self, path: &str, mtime: i64) -> Result<()> {
        let Some(shell) = &self.shell else {
            tracing::debug!("无命令通道，跳过远程修改时间回写: {}", path);
            return Ok(());
        };

        let target = shell_quote(&self.absolute_path(path));

        // GNU touch 接受 @epoch；BSD 系统回退到 -t 格式
        let command = format!("touch -m -d @{} -- {}", mtime, target);
        let output = shell.run(&command).await?;
        if output.success() {
            return Ok(());
        }

        let stamp = Utc
            .timestamp_opt(mtime, 0)
            .single()
            .map(|t| t.format("%Y%m%d%H%M.%S").to_string())
            .ok_or_else(|| anyhow::anyhow!("非法的修改时间: {}", mtime))?;
        let fallback = format!("env TZ=UTC touch -m -t {} {}", stamp, target);
        let output = shell.run(&fallback).await?;
        if !output.success() {
            anyhow::bail!("远程修改时间回写失败: {}: {}", path, output.stderr.trim());
        }

        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
