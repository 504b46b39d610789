//! 目录树比较与方向推荐
//!
//! 把本地与远程两份快照按相对路径配对（大小写不敏感回退），对每一对做
//! 分类（一致 / 本地较新 / 远程较新 / 仅本地 / 仅远程），再归纳出一个
//! 方向性推荐。时间戳差异先经过时区偏移与刚同步完的抖动两道筛选，
//! 避免把无害的时钟差误判为真实修改。

use crate::core::scanner::TreeSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// 分析模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    /// 完整扫描整棵目录树
    #[default]
    Full,
    /// 只扫根目录加一层子目录，差异文件达到阈值即提前给出结论
    Quick,
    /// 不扫文件，比较仓库最新提交的时间戳
    Git,
}

/// 方向推荐
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Recommendation {
    InSync,
    SyncToRemote,
    SyncToLocal,
    /// 分析未能完成（扫描/连接失败），error 字段带有原因
    Unknown,
}

/// 快速模式提前判定阈值：一侧累计 3 个较新文件且另一侧无差异即可下结论
pub const QUICK_DECISION_THRESHOLD: usize = 3;

/// 时区偏移筛选：等长文件的时间差落在这些整点偏移附近视为一致（小时）
pub const TIMEZONE_STEPS_HOURS: &[f64] = &[1.0, 2.0, 3.0, 4.0, 5.0, 5.5, 6.0];

/// 时区偏移筛选的容差（秒）
pub const TIMEZONE_TOLERANCE_SECS: i64 = 300;

/// 刚同步完的时钟抖动容差（秒）
pub const RECENT_SYNC_TOLERANCE_SECS: i64 = 5;

/// 一次分析的输出
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    pub recommendation: Recommendation,
    /// 本地较新的路径
    pub newer_local: Vec<String>,
    /// 远程较新的路径
    pub newer_remote: Vec<String>,
    /// 仅本地存在的路径
    pub local_only: Vec<String>,
    /// 仅远程存在的路径
    pub remote_only: Vec<String>,
    /// 是否由不完整扫描提前得出（快速模式），此时各计数含义为"至少"
    pub early_decision: bool,
    pub error: Option<String>,
    /// 小写路径 -> 原始大小写路径，后续传输寻址时使用
    pub local_casefold: HashMap<String, String>,
    pub remote_casefold: HashMap<String, String>,
}

impl ComparisonResult {
    fn empty() -> Self {
        Self {
            recommendation: Recommendation::InSync,
            newer_local: Vec::new(),
            newer_remote: Vec::new(),
            local_only: Vec::new(),
            remote_only: Vec::new(),
            early_decision: false,
            error: None,
            local_casefold: HashMap::new(),
            remote_casefold: HashMap::new(),
        }
    }

    /// 构造一个只有推荐、没有分类列表的结果（Git 模式使用）
    pub fn decided(recommendation: Recommendation) -> Self {
        Self {
            recommendation,
            ..Self::empty()
        }
    }

    /// 构造一个失败结果：推荐未知，附带可直接展示的原因
    pub fn unknown(message: impl Into<String>) -> Self {
        Self {
            recommendation: Recommendation::Unknown,
            error: Some(message.into()),
            ..Self::empty()
        }
    }

    /// 本地侧需要同步的总数
    pub fn total_local_needs_sync(&self) -> usize {
        self.newer_local.len() + self.local_only.len()
    }

    /// 远程侧需要同步的总数
    pub fn total_remote_needs_sync(&self) -> usize {
        self.newer_remote.len() + self.remote_only.len()
    }
}

/// 单对文件的分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairClass {
    InSync,
    NewerLocal,
    NewerRemote,
}

/// 目录树比较器
pub struct TreeComparator;

impl TreeComparator {
    /// 比较两份快照并给出推荐；纯函数，不触碰任何文件系统
    pub fn compare(
        local: &TreeSnapshot,
        remote: &TreeSnapshot,
        mode: AnalysisMode,
    ) -> ComparisonResult {
        let mut result = ComparisonResult::empty();

        result.local_casefold = casefold_map(local);
        result.remote_casefold = casefold_map(remote);

        // 排序保证同样输入得到同样结论（HashMap 顺序不稳定）
        let mut local_paths: Vec<&String> = local.keys().collect();
        local_paths.sort();

        for path in local_paths {
            let local_entry = &local[path];

            // 精确匹配优先，找不到再按小写回退
            let remote_entry = remote.get(path).or_else(|| {
                result
                    .remote_casefold
                    .get(&path.to_lowercase())
                    .and_then(|canonical| remote.get(canonical))
            });

            match remote_entry {
                None => result.local_only.push(path.clone()),
                Some(remote_entry) => match Self::classify_pair(local_entry, remote_entry) {
                    PairClass::InSync => {}
                    PairClass::NewerLocal => result.newer_local.push(path.clone()),
                    PairClass::NewerRemote => result.newer_remote.push(path.clone()),
                },
            }

            // 快速模式：一侧差异达到阈值而另一侧干净，立即收束
            if mode == AnalysisMode::Quick {
                if result.newer_local.len() >= QUICK_DECISION_THRESHOLD
                    && result.newer_remote.is_empty()
                    && result.local_only.is_empty()
                {
                    info!("快速模式提前判定: 本地较新 {} 个", result.newer_local.len());
                    result.recommendation = Recommendation::SyncToRemote;
                    result.early_decision = true;
                    return result;
                }
                if result.newer_remote.len() >= QUICK_DECISION_THRESHOLD
                    && result.newer_local.is_empty()
                    && result.remote_only.is_empty()
                {
                    info!("快速模式提前判定: 远程较新 {} 个", result.newer_remote.len());
                    result.recommendation = Recommendation::SyncToLocal;
                    result.early_decision = true;
                    return result;
                }
            }
        }

        // 第二遍：仅远程存在的路径（提前判定时整遍跳过）
        let mut remote_paths: Vec<&String> = remote.keys().collect();
        remote_paths.sort();

        for path in remote_paths {
            if local.contains_key(path) || result.local_casefold.contains_key(&path.to_lowercase())
            {
                continue;
            }
            result.remote_only.push(path.clone());
        }

        result.recommendation = Self::recommend(&result);

        debug!(
            "比较完成: 本地较新 {}, 远程较新 {}, 仅本地 {}, 仅远程 {}, 推荐 {:?}",
            result.newer_local.len(),
            result.newer_remote.len(),
            result.local_only.len(),
            result.remote_only.len(),
            result.recommendation
        );

        result
    }

    /// 对两侧都存在的一对文件分类
    fn classify_pair(local: &crate::core::scanner::FileEntry, remote: &crate::core::scanner::FileEntry) -> PairClass {
        let size_diff = local.size as i64 - remote.size as i64;
        let time_diff = local.modified_time - remote.modified_time;

        if size_diff != 0 {
            // 大小不同即内容确定不同，按哪侧时间更晚归类；
            // 时间相等时保守地判远程较新
            return if time_diff > 0 {
                PairClass::NewerLocal
            } else {
                PairClass::NewerRemote
            };
        }

        if time_diff == 0 {
            return PairClass::InSync;
        }

        let abs_diff = time_diff.abs();

        // 时间差接近整点时区偏移：典型的时区伪差异，不是真实修改
        if Self::matches_timezone_step(abs_diff) {
            return PairClass::InSync;
        }

        // 刚同步完的时钟/传输延迟抖动
        if abs_diff <= RECENT_SYNC_TOLERANCE_SECS {
            return PairClass::InSync;
        }

        if time_diff > 0 {
            PairClass::NewerLocal
        } else {
            PairClass::NewerRemote
        }
    }

    fn matches_timezone_step(abs_diff_secs: i64) -> bool {
        TIMEZONE_STEPS_HOURS.iter().any(|hours| {
            let step = (hours * 3600.0) as i64;
            (abs_diff_secs - step).abs() <= TIMEZONE_TOLERANCE_SECS
        })
    }

    /// 由各类计数归纳最终推荐
    ///
    /// 双方都有差异且总数相等时固定判向远程（确定性的并列规则，
    /// 所有路径统一使用）。
    fn recommend(result: &ComparisonResult) -> Recommendation {
        let local_total = result.total_local_needs_sync();
        let remote_total = result.total_remote_needs_sync();

        match (local_total, remote_total) {
            (0, 0) => Recommendation::InSync,
            (_, 0) => Recommendation::SyncToRemote,
            (0, _) => Recommendation::SyncToLocal,
            (l, r) if l >= r => Recommendation::SyncToRemote,
            _ => Recommendation::SyncToLocal,
        }
    }
}

fn casefold_map(snapshot: &TreeSnapshot) -> HashMap<String, String> {
    snapshot
        .keys()
        .map(|path| (path.to_lowercase(), path.clone()))
        .collect()
}
