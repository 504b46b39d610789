//! 同步引擎
//!
//! 把过滤、扫描、时钟校正、比较、计划与执行串成一条工作流。
//! 一次分析或同步是一个独立运行：不依赖上一次运行留下的可变状态，
//! 远程命令按条执行，连接不跨运行保留。

use crate::config::SyncProfile;
use crate::core::comparator::{AnalysisMode, ComparisonResult, TreeComparator};
use crate::core::filter::{ExclusionRules, Purpose};
use crate::core::git::GitComparator;
use crate::core::planner::{SyncDirection, SyncPlan, SyncPlanner};
use crate::core::scanner::TreeScanner;
use crate::core::transfer::{ExecutorConfig, PlanExecutor, SyncReport};
use crate::core::clock::ClockCorrector;
use crate::error::{Result, SyncError};
use crate::progress::{NullSink, StatusSink};
use crate::remote::shell::{CommandChannel, SshShell};
use crate::storage::{create_local_storage, create_sftp_storage, Storage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// 快速模式的扫描深度：根目录文件加一层子目录
const QUICK_SCAN_DEPTH: usize = 2;

/// 同步引擎
pub struct SyncEngine {
    profile: SyncProfile,
    rules: Arc<ExclusionRules>,
    cancelled: Arc<AtomicBool>,
    status: Arc<dyn StatusSink>,
    executor_config: ExecutorConfig,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("profile", &self.profile)
            .field("rules", &self.rules)
            .field("cancelled", &self.cancelled)
            .field("executor_config", &self.executor_config)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// 创建引擎；配置不合法时在任何扫描开始前即失败
    pub fn new(profile: SyncProfile) -> Result<Self> {
        Self::with_status(profile, Arc::new(NullSink))
    }

    /// 创建引擎并注入状态回调
    pub fn with_status(profile: SyncProfile, status: Arc<dyn StatusSink>) -> Result<Self> {
        profile.validate()?;
        let rules = Arc::new(ExclusionRules::new(&profile.exclusions));
        Ok(Self {
            profile,
            rules,
            cancelled: Arc::new(AtomicBool::new(false)),
            status,
            executor_config: ExecutorConfig::default(),
        })
    }

    pub fn with_executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor_config = config;
        self
    }

    /// 请求取消当前运行；在每个循环边界生效
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
        info!("收到取消请求");
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    fn command_channel(&self) -> Arc<dyn CommandChannel> {
        Arc::new(SshShell::new(&self.profile.connection))
    }

    fn scan_depth(mode: AnalysisMode) -> Option<usize> {
        match mode {
            AnalysisMode::Quick => Some(QUICK_SCAN_DEPTH),
            _ => None,
        }
    }

    /// 分析两侧并给出方向推荐
    ///
    /// 扫描/连接/Git 查询失败时返回一个 `Unknown` 结果并带上原因
    /// （绝不返回半填充的结果），取消时返回 [`SyncError::Cancelled`]。
    pub async fn analyze(&self) -> Result<ComparisonResult> {
        self.cancelled.store(false, Ordering::Relaxed);
        let mode = self.profile.mode;

        info!("开始分析: {} ({:?} 模式)", self.profile.name, mode);
        self.status.report(&format!("开始分析: {}", self.profile.name));

        if mode == AnalysisMode::Git {
            let channel = self.command_channel();
            return match GitComparator::compare(
                &self.profile.local_path,
                &self.profile.remote_path,
                channel.as_ref(),
            )
            .await
            {
                Ok(result) => {
                    self.status
                        .report(&format!("Git 比较完成: {:?}", result.recommendation));
                    Ok(result)
                }
                Err(SyncError::Cancelled) => Err(SyncError::Cancelled),
                Err(e) => {
                    warn!("Git 比较失败: {}", e);
                    self.status.report("Git 比较失败");
                    Ok(ComparisonResult::unknown(e.to_string()))
                }
            };
        }

        let depth = Self::scan_depth(mode);
        let scanner = TreeScanner::with_cancel(self.rules.clone(), self.cancelled.clone());

        // 本地侧先扫，本地目录缺失时不建立任何远程连接
        let local_storage = match create_local_storage(&self.profile.local_path) {
            Ok(s) => s,
            Err(e) => return Ok(ComparisonResult::unknown(e.to_string())),
        };
        let local_snapshot = match scanner
            .scan(local_storage.as_ref(), Purpose::Analysis, depth)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
            Err(e) => return Ok(ComparisonResult::unknown(e.to_string())),
        };
        self.status
            .report(&format!("本地扫描完成: {} 个文件", local_snapshot.len()));

        let channel = self.command_channel();
        let remote_storage = match create_sftp_storage(
            &self.profile.connection,
            &self.profile.remote_path,
            Some(channel.clone()),
        ) {
            Ok(s) => s,
            Err(e) => return Ok(ComparisonResult::unknown(e.to_string())),
        };
        let mut remote_snapshot = match scanner
            .scan(remote_storage.as_ref(), Purpose::Analysis, depth)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
            Err(e) => return Ok(ComparisonResult::unknown(e.to_string())),
        };
        self.status
            .report(&format!("远程扫描完成: {} 个文件", remote_snapshot.len()));

        // 远程时间戳校正只降低精度，从不失败
        ClockCorrector::correct(
            channel.as_ref(),
            &self.profile.remote_path,
            &mut remote_snapshot,
            &self.cancelled,
        )
        .await;

        if self.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let result = TreeComparator::compare(&local_snapshot, &remote_snapshot, mode);
        self.status
            .report(&format!("分析完成: 推荐 {:?}", result.recommendation));

        Ok(result)
    }

    /// 重新扫描两侧并生成同步计划（与之前的分析结果无关）
    pub async fn plan(&self, direction: SyncDirection) -> Result<SyncPlan> {
        let channel = self.command_channel();
        let local_storage = create_local_storage(&self.profile.local_path)
            .map_err(|e| SyncError::Scan(e.to_string()))?;
        let remote_storage = create_sftp_storage(
            &self.profile.connection,
            &self.profile.remote_path,
            Some(channel),
        )
        .map_err(|e| SyncError::Scan(e.to_string()))?;

        let planner = SyncPlanner::with_cancel(self.rules.clone(), self.cancelled.clone());
        planner
            .plan(local_storage.as_ref(), remote_storage.as_ref(), direction)
            .await
    }

    /// 生成并执行同步计划
    pub async fn run_sync(&self, direction: SyncDirection) -> Result<SyncReport> {
        self.cancelled.store(false, Ordering::Relaxed);

        info!("开始同步: {} ({:?})", self.profile.name, direction);
        self.status.report(&format!("开始同步: {}", self.profile.name));

        let channel = self.command_channel();
        let local_storage = create_local_storage(&self.profile.local_path)
            .map_err(|e| SyncError::Scan(e.to_string()))?;
        let remote_storage = create_sftp_storage(
            &self.profile.connection,
            &self.profile.remote_path,
            Some(channel),
        )
        .map_err(|e| SyncError::Scan(e.to_string()))?;

        let planner = SyncPlanner::with_cancel(self.rules.clone(), self.cancelled.clone());
        let plan = planner
            .plan(local_storage.as_ref(), remote_storage.as_ref(), direction)
            .await?;

        let (source, dest): (Arc<dyn Storage>, Arc<dyn Storage>) = match direction {
            SyncDirection::ToRemote => (local_storage, remote_storage),
            SyncDirection::ToLocal => (remote_storage, local_storage),
        };

        let executor = PlanExecutor::new(
            self.executor_config.clone(),
            self.cancelled.clone(),
            self.status.clone(),
        );
        let report = executor.apply(&plan, source, dest).await;

        Ok(report)
    }
}
