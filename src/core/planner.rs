//! 同步计划
//!
//! 给定方向，重新对两侧做完整的同步用途扫描（从不复用分析结果或快速
//! 模式的部分扫描，不完整的计划会破坏镜像），计算需要传输与需要删除
//! 的路径集合，使目标侧成为源侧的镜像（受同步排除规则约束）。

use crate::core::filter::{ExclusionRules, Purpose};
use crate::core::scanner::{TreeScanner, TreeSnapshot};
use crate::error::Result;
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

/// 同步方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncDirection {
    ToRemote,
    ToLocal,
}

/// 一次同步的具体计划
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPlan {
    pub direction: SyncDirection,
    /// 需要从源侧传输到目标侧的路径（源侧大小写）
    pub to_transfer: Vec<String>,
    /// 需要在目标侧删除的路径（目标侧大小写）
    pub to_delete: Vec<String>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.to_transfer.is_empty() && self.to_delete.is_empty()
    }
}

/// 同步计划生成器
pub struct SyncPlanner {
    rules: Arc<ExclusionRules>,
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl SyncPlanner {
    pub fn new(rules: Arc<ExclusionRules>) -> Self {
        Self {
            rules,
            cancel_flag: None,
        }
    }

    pub fn with_cancel(rules: Arc<ExclusionRules>, cancel_flag: Arc<AtomicBool>) -> Self {
        Self {
            rules,
            cancel_flag: Some(cancel_flag),
        }
    }

    /// 重新扫描两侧并生成计划
    ///
    /// 扫描始终是全深度、同步用途的，与之前分析用的快照无关。
    pub async fn plan(
        &self,
        local: &dyn Storage,
        remote: &dyn Storage,
        direction: SyncDirection,
    ) -> Result<SyncPlan> {
        let scanner = match &self.cancel_flag {
            Some(flag) => TreeScanner::with_cancel(self.rules.clone(), flag.clone()),
            None => TreeScanner::new(self.rules.clone()),
        };

        let local_snapshot = scanner.scan(local, Purpose::Sync, None).await?;
        let remote_snapshot = scanner.scan(remote, Purpose::Sync, None).await?;

        let plan = match direction {
            SyncDirection::ToRemote => {
                Self::build_plan(&local_snapshot, &remote_snapshot, direction)
            }
            SyncDirection::ToLocal => {
                Self::build_plan(&remote_snapshot, &local_snapshot, direction)
            }
        };

        info!(
            "同步计划 {:?}: 传输 {} 个, 删除 {} 个",
            direction,
            plan.to_transfer.len(),
            plan.to_delete.len()
        );

        Ok(plan)
    }

    /// 由源/目标快照计算镜像计划；纯函数
    ///
    /// 传输：源侧中目标缺失（大小写不敏感）或源侧严格更新（简单 `>`，
    /// 无任何容差——比较器判定"一致"的文件在这里重传是安全的空操作）。
    /// 删除：目标侧中源缺失的路径。输出按路径排序，保证确定性。
    pub fn build_plan(
        source: &TreeSnapshot,
        dest: &TreeSnapshot,
        direction: SyncDirection,
    ) -> SyncPlan {
        let dest_casefold: HashMap<String, &String> = dest
            .keys()
            .map(|path| (path.to_lowercase(), path))
            .collect();
        let source_casefold: HashMap<String, &String> = source
            .keys()
            .map(|path| (path.to_lowercase(), path))
            .collect();

        let mut to_transfer = Vec::new();
        for (path, entry) in source {
            let dest_entry = dest.get(path).or_else(|| {
                dest_casefold
                    .get(&path.to_lowercase())
                    .and_then(|canonical| dest.get(*canonical))
            });

            match dest_entry {
                None => to_transfer.push(path.clone()),
                Some(dest_entry) if entry.modified_time > dest_entry.modified_time => {
                    to_transfer.push(path.clone());
                }
                Some(_) => {}
            }
        }

        let mut to_delete = Vec::new();
        for path in dest.keys() {
            if source.contains_key(path) || source_casefold.contains_key(&path.to_lowercase()) {
                continue;
            }
            to_delete.push(path.clone());
        }

        to_transfer.sort();
        to_delete.sort();

        SyncPlan {
            direction,
            to_transfer,
            to_delete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExclusionConfig;
    use crate::core::scanner::FileEntry;
    use crate::storage::LocalStorage;
    use std::collections::HashSet;

    const T: i64 = 1_700_000_000;

    fn entry(path: &str, mtime: i64) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            modified_time: mtime,
            size: 1,
        }
    }

    fn snapshot(entries: &[FileEntry]) -> TreeSnapshot {
        entries
            .iter()
            .map(|e| (e.path.clone(), e.clone()))
            .collect()
    }

    #[test]
    fn test_build_plan_transfers_missing_and_newer() {
        let source = snapshot(&[
            entry("only-src.txt", T),
            entry("newer.txt", T + 1),
            entry("same.txt", T),
            entry("older.txt", T - 100),
        ]);
        let dest = snapshot(&[
            entry("newer.txt", T),
            entry("same.txt", T),
            entry("older.txt", T),
            entry("only-dest.txt", T),
        ]);

        let plan = SyncPlanner::build_plan(&source, &dest, SyncDirection::ToRemote);

        // 严格 >，1 秒的差异也传输（无比较器的容差）
        assert_eq!(plan.to_transfer, vec!["newer.txt", "only-src.txt"]);
        assert_eq!(plan.to_delete, vec!["only-dest.txt"]);
    }

    #[test]
    fn test_build_plan_casefold_pairing() {
        let source = snapshot(&[entry("Readme.MD", T)]);
        let dest = snapshot(&[entry("readme.md", T)]);

        let plan = SyncPlanner::build_plan(&source, &dest, SyncDirection::ToRemote);

        // 大小写不同视为同一文件：不传输也不删除
        assert!(plan.to_transfer.is_empty());
        assert!(plan.to_delete.is_empty());
        assert!(plan.is_empty());
    }

    #[test]
    fn test_build_plan_mirror_invariant() {
        // 应用计划后目标路径集合等于源路径集合（大小写不敏感）
        let source = snapshot(&[entry("a.txt", T), entry("d/b.txt", T + 5), entry("c.txt", T)]);
        let dest = snapshot(&[entry("a.txt", T - 50), entry("stale.txt", T), entry("C.TXT", T)]);

        let plan = SyncPlanner::build_plan(&source, &dest, SyncDirection::ToRemote);

        let mut final_set: HashSet<String> =
            dest.keys().map(|p| p.to_lowercase()).collect();
        for path in &plan.to_delete {
            final_set.remove(&path.to_lowercase());
        }
        for path in &plan.to_transfer {
            final_set.insert(path.to_lowercase());
        }

        let source_set: HashSet<String> = source.keys().map(|p| p.to_lowercase()).collect();
        assert_eq!(final_set, source_set);
    }

    #[test]
    fn test_build_plan_output_is_sorted() {
        let source = snapshot(&[entry("z.txt", T), entry("a.txt", T), entry("m.txt", T)]);
        let dest = snapshot(&[entry("y.txt", T), entry("b.txt", T)]);

        let plan = SyncPlanner::build_plan(&source, &dest, SyncDirection::ToLocal);
        assert_eq!(plan.to_transfer, vec!["a.txt", "m.txt", "z.txt"]);
        assert_eq!(plan.to_delete, vec!["b.txt", "y.txt"]);
    }

    #[tokio::test]
    async fn test_plan_rescans_with_sync_purpose() {
        // 仅分析排除的目录必须出现在同步计划里
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src_dir.path().join("logs")).unwrap();
        std::fs::write(src_dir.path().join("logs/app.log"), b"x").unwrap();
        std::fs::write(src_dir.path().join("data.txt"), b"y").unwrap();

        let rules = Arc::new(ExclusionRules::new(&ExclusionConfig {
            folders_from_analysis: vec!["logs".to_string()],
            ..Default::default()
        }));

        let local = LocalStorage::new(src_dir.path().to_str().unwrap()).unwrap();
        let remote = LocalStorage::new(dst_dir.path().to_str().unwrap()).unwrap();

        let planner = SyncPlanner::new(rules);
        let plan = planner
            .plan(&local, &remote, SyncDirection::ToRemote)
            .await
            .unwrap();

        assert_eq!(plan.to_transfer, vec!["data.txt", "logs/app.log"]);
        assert!(plan.to_delete.is_empty());
    }

    #[tokio::test]
    async fn test_plan_direction_to_local_swaps_sides() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        std::fs::write(dst_dir.path().join("remote-only.txt"), b"r").unwrap();
        std::fs::write(src_dir.path().join("local-only.txt"), b"l").unwrap();

        let local = LocalStorage::new(src_dir.path().to_str().unwrap()).unwrap();
        let remote = LocalStorage::new(dst_dir.path().to_str().unwrap()).unwrap();

        let planner = SyncPlanner::new(Arc::new(ExclusionRules::default()));
        let plan = planner
            .plan(&local, &remote, SyncDirection::ToLocal)
            .await
            .unwrap();

        // ToLocal: 远程是源，本地是目标
        assert_eq!(plan.to_transfer, vec!["remote-only.txt"]);
        assert_eq!(plan.to_delete, vec!["local-only.txt"]);
    }
}
