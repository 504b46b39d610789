pub mod local;
pub mod sftp;

use crate::config::ConnectionConfig;
use crate::remote::shell::CommandChannel;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use local::LocalStorage;
pub use sftp::SftpStorage;

/// 文件信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    /// 相对根目录的路径，统一使用 / 分隔
    pub path: String,
    pub size: u64,
    /// 修改时间（UTC 秒）
    pub modified_time: i64,
    pub is_dir: bool,
}

/// 文件元数据（用于快速检查）
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub size: u64,
    pub modified_time: i64,
    pub is_dir: bool,
}

/// 存储抽象接口
///
/// 本地目录与 SFTP 目录统一在该接口之后，扫描器与执行器对两侧一视同仁。
#[async_trait]
pub trait Storage: Send + Sync {
    /// 列出文件；`max_depth` 限制递归层数（`Some(2)` 表示根目录文件
    /// 加一层子目录），`None` 表示完整递归。根目录不可达时返回错误。
    async fn list_files(
        &self,
        prefix: Option<&str>,
        max_depth: Option<usize>,
    ) -> Result<Vec<FileInfo>>;

    /// 获取文件元数据，不存在时返回 None
    async fn stat(&self, path: &str) -> Result<Option<FileMeta>>;

    /// 读取整个文件
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// 写入整个文件，父目录不存在时自动创建
    async fn write(&self, path: &str, data: Vec<u8>) -> Result<()>;

    /// 删除文件，不存在时视为成功
    async fn delete(&self, path: &str) -> Result<()>;

    /// 把目标文件的修改时间设置为给定的 UTC 秒。
    /// 传输后调用，保证下次分析时两侧时间戳一致。
    async fn set_modified(&self, path: &str, mtime: i64) -> Result<()>;

    /// 存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 创建本地存储实例
pub fn create_local_storage(path: &str) -> Result<Arc<dyn Storage>> {
    tracing::info!("初始化本地存储: {}", path);
    Ok(Arc::new(LocalStorage::new(path)?) as Arc<dyn Storage>)
}

/// 创建 SFTP 存储实例；`shell` 用于远程修改时间回写，可为空
pub fn create_sftp_storage(
    connection: &ConnectionConfig,
    root: &str,
    shell: Option<Arc<dyn CommandChannel>>,
) -> Result<Arc<dyn Storage>> {
    tracing::info!(
        "初始化SFTP存储: {}@{}:{}{}",
        connection.username,
        connection.host,
        connection.port,
        root
    );
    Ok(Arc::new(SftpStorage::new(connection, root, shell)?) as Arc<dyn Storage>)
}
