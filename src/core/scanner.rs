//! 目录树扫描器
//!
//! 对一侧存储做一次枚举，应用排除规则，产出相对路径到文件条目的快照。
//! 快照仅在一次分析或同步内有效，用完即弃，从不落盘。

use crate::core::filter::{EntryKind, ExclusionRules, Purpose};
use crate::error::{Result, SyncError};
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// 一个被跟踪的文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// 相对路径，/ 分隔，保留来源侧的大小写
    pub path: String,
    /// 修改时间（UTC 秒）
    pub modified_time: i64,
    pub size: u64,
}

/// 一侧的目录树快照
pub type TreeSnapshot = HashMap<String, FileEntry>;

/// 目录树扫描器
pub struct TreeScanner {
    rules: Arc<ExclusionRules>,
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl TreeScanner {
    pub fn new(rules: Arc<ExclusionRules>) -> Self {
        Self {
            rules,
            cancel_flag: None,
        }
    }

    /// 创建带取消标志的扫描器
    pub fn with_cancel(rules: Arc<ExclusionRules>, cancel_flag: Arc<AtomicBool>) -> Self {
        Self {
            rules,
            cancel_flag: Some(cancel_flag),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .map(|f| f.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// 扫描存储并返回快照
    ///
    /// `max_depth` 限制递归层数（快速模式传 `Some(2)`：根目录文件加一层
    /// 子目录）。根目录不可达时返回 [`SyncError::Scan`]。
    pub async fn scan(
        &self,
        storage: &dyn Storage,
        purpose: Purpose,
        max_depth: Option<usize>,
    ) -> Result<TreeSnapshot> {
        if self.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        info!("开始扫描: {}, max_depth: {:?}", storage.name(), max_depth);

        let files = storage
            .list_files(None, max_depth)
            .await
            .map_err(|e| SyncError::Scan(format!("{}: {}", storage.name(), e)))?;

        if self.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let mut tree = TreeSnapshot::new();
        let mut excluded_count = 0;
        let mut dir_count = 0;

        for file in files {
            // 每处理一定数量检查一次取消状态
            if tree.len() % 100 == 0 && self.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            if file.is_dir {
                dir_count += 1;
                continue;
            }

            // 路径中任一父目录被排除，或文件名/扩展名被排除
            if self
                .rules
                .is_path_excluded(&file.path, EntryKind::File, purpose)
            {
                debug!("排除文件: {}", file.path);
                excluded_count += 1;
                continue;
            }

            tree.insert(
                file.path.clone(),
                FileEntry {
                    path: file.path,
                    modified_time: file.modified_time,
                    size: file.size,
                },
            );
        }

        info!(
            "扫描完成: {} 个文件, {} 个目录, {} 个被排除",
            tree.len(),
            dir_count,
            excluded_count
        );

        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExclusionConfig;
    use crate::storage::LocalStorage;

    fn write_file(root: &std::path::Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_scan_applies_exclusions() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "keep.txt", b"a");
        write_file(dir.path(), ".git/config", b"b");
        write_file(dir.path(), "notes/draft.tmp", b"c");
        write_file(dir.path(), "notes/real.md", b"d");

        let storage = LocalStorage::new(dir.path().to_str().unwrap()).unwrap();
        let scanner = TreeScanner::new(Arc::new(ExclusionRules::default()));
        let tree = scanner
            .scan(&storage, Purpose::Analysis, None)
            .await
            .unwrap();

        assert!(tree.contains_key("keep.txt"));
        assert!(tree.contains_key("notes/real.md"));
        assert!(!tree.contains_key(".git/config"));
        assert!(!tree.contains_key("notes/draft.tmp"));
    }

    #[tokio::test]
    async fn test_scan_purpose_differs() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "logs/app.log", b"x");
        write_file(dir.path(), "data.txt", b"y");

        let storage = LocalStorage::new(dir.path().to_str().unwrap()).unwrap();
        let rules = Arc::new(ExclusionRules::new(&ExclusionConfig {
            folders_from_analysis: vec!["logs".to_string()],
            ..Default::default()
        }));

        let scanner = TreeScanner::new(rules);
        let analysis = scanner
            .scan(&storage, Purpose::Analysis, None)
            .await
            .unwrap();
        let sync = scanner.scan(&storage, Purpose::Sync, None).await.unwrap();

        // 仅分析排除的目录仍参与同步
        assert!(!analysis.contains_key("logs/app.log"));
        assert!(sync.contains_key("logs/app.log"));
    }

    #[tokio::test]
    async fn test_scan_missing_root_is_scan_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent");
        let storage = LocalStorage::new(missing.to_str().unwrap()).unwrap();
        let scanner = TreeScanner::new(Arc::new(ExclusionRules::default()));

        let err = scanner
            .scan(&storage, Purpose::Sync, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Scan(_)));
    }

    #[tokio::test]
    async fn test_scan_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().to_str().unwrap()).unwrap();
        let flag = Arc::new(AtomicBool::new(true));
        let scanner = TreeScanner::with_cancel(Arc::new(ExclusionRules::default()), flag);

        let err = scanner
            .scan(&storage, Purpose::Sync, None)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
