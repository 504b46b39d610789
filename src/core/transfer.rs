//! 计划执行器
//!
//! 把同步计划落到存储上：并发受限的读写复制、传输后回写源侧修改时间、
//! 传输完成后再做删除。单个文件失败不中断整体（继续执行其余动作），
//! 重试采用指数退避。取消信号在每个动作边界被检查。

use crate::core::planner::SyncPlan;
use crate::progress::StatusSink;
use crate::storage::Storage;
use scopeguard::guard;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, error, info, warn};

/// 执行参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorConfig {
    /// 同时在途的传输数
    pub max_concurrent_transfers: usize,
    pub max_retries: u32,
    /// 首次重试延迟，之后指数退避
    pub retry_base_delay_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: 4,
            max_retries: 3,
            retry_base_delay_ms: 500,
        }
    }
}

/// 一次同步执行的汇总
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub files_transferred: u32,
    pub files_deleted: u32,
    pub files_failed: u32,
    pub bytes_transferred: u64,
    pub duration_ms: u64,
    pub errors: Vec<String>,
    pub cancelled: bool,
}

#[derive(Default)]
struct TransferStats {
    files_completed: AtomicU64,
    files_failed: AtomicU64,
    bytes_transferred: AtomicU64,
}

/// 计划执行器
pub struct PlanExecutor {
    config: ExecutorConfig,
    cancelled: Arc<AtomicBool>,
    status: Arc<dyn StatusSink>,
}

impl PlanExecutor {
    pub fn new(
        config: ExecutorConfig,
        cancelled: Arc<AtomicBool>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            config,
            cancelled,
            status,
        }
    }

    /// 执行计划：先并发传输，全部结束后再删除
    pub async fn apply(
        &self,
        plan: &SyncPlan,
        source: Arc<dyn Storage>,
        dest: Arc<dyn Storage>,
    ) -> SyncReport {
        let start = Instant::now();
        let total_transfers = plan.to_transfer.len();

        info!(
            "开始执行同步计划: 传输 {} 个, 删除 {} 个",
            total_transfers,
            plan.to_delete.len()
        );
        self.status.report(&format!(
            "开始同步: 传输 {} 个文件, 删除 {} 个文件",
            total_transfers,
            plan.to_delete.len()
        ));

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_transfers));
        let stats = Arc::new(TransferStats::default());
        let errors = Arc::new(RwLock::new(Vec::<String>::new()));

        // 周期性进度播报，函数返回时一定被终止
        let ticker = {
            let stats = stats.clone();
            let status = self.status.clone();
            let cancelled = self.cancelled.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    if cancelled.load(Ordering::Relaxed) {
                        break;
                    }
                    let done = stats.files_completed.load(Ordering::Relaxed)
                        + stats.files_failed.load(Ordering::Relaxed);
                    status.report(&format!("同步中: {}/{} 个文件", done, total_transfers));
                }
            })
        };
        let _ticker = guard(ticker, |t| t.abort());

        let mut handles = Vec::new();

        for path in &plan.to_transfer {
            if self.cancelled.load(Ordering::Relaxed) {
                break;
            }

            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let source = source.clone();
            let dest = dest.clone();
            let stats = stats.clone();
            let errors = errors.clone();
            let cancelled = self.cancelled.clone();
            let path = path.clone();
            let max_retries = self.config.max_retries;
            let base_delay = self.config.retry_base_delay_ms;

            let handle = tokio::spawn(async move {
                let result = Self::copy_with_retry(
                    &path,
                    source.as_ref(),
                    dest.as_ref(),
                    max_retries,
                    base_delay,
                    &cancelled,
                )
                .await;

                match result {
                    Ok(bytes) => {
                        stats.files_completed.fetch_add(1, Ordering::Relaxed);
                        stats.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
                    }
                    Err(e) => {
                        stats.files_failed.fetch_add(1, Ordering::Relaxed);
                        errors.write().await.push(e);
                    }
                }

                drop(permit);
            });

            handles.push(handle);
        }

        for handle in handles {
            let _ = handle.await;
        }

        // 删除放在所有传输之后，避免和同名路径的写入交错
        let mut files_deleted = 0u32;
        for path in &plan.to_delete {
            if self.cancelled.load(Ordering::Relaxed) {
                break;
            }

            match dest.delete(path).await {
                Ok(()) => {
                    debug!("删除: {}", path);
                    files_deleted += 1;
                }
                Err(e) => {
                    error!("删除失败: {}: {}", path, e);
                    stats.files_failed.fetch_add(1, Ordering::Relaxed);
                    errors.write().await.push(format!("{}: {}", path, e));
                }
            }
        }

        let report = SyncReport {
            files_transferred: stats.files_completed.load(Ordering::Relaxed) as u32,
            files_deleted,
            files_failed: stats.files_failed.load(Ordering::Relaxed) as u32,
            bytes_transferred: stats.bytes_transferred.load(Ordering::Relaxed),
            duration_ms: start.elapsed().as_millis() as u64,
            errors: errors.read().await.clone(),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        };

        if report.cancelled {
            self.status.report("同步已取消");
        } else {
            self.status.report(&format!(
                "同步完成: 传输 {} 个, 删除 {} 个, 失败 {} 个",
                report.files_transferred, report.files_deleted, report.files_failed
            ));
        }

        info!(
            "同步执行结束: 传输 {}, 删除 {}, 失败 {}, {} 字节, 耗时 {}ms",
            report.files_transferred,
            report.files_deleted,
            report.files_failed,
            report.bytes_transferred,
            report.duration_ms
        );

        report
    }

    /// 带指数退避重试的单文件复制，成功后把源侧修改时间写到目标侧
    async fn copy_with_retry(
        path: &str,
        source: &dyn Storage,
        dest: &dyn Storage,
        max_retries: u32,
        base_delay_ms: u64,
        cancelled: &AtomicBool,
    ) -> Result<u64, String> {
        let mut last_error = String::new();

        for attempt in 0..=max_retries {
            if cancelled.load(Ordering::Relaxed) {
                return Err(format!("{}: 操作已取消", path));
            }

            match Self::copy_once(path, source, dest).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < max_retries {
                        let delay = base_delay_ms * 2_u64.pow(attempt);
                        warn!(
                            "传输失败，{}ms 后重试 ({}/{}): {}: {}",
                            delay,
                            attempt + 1,
                            max_retries,
                            path,
                            last_error
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    } else {
                        error!("传输最终失败 (已重试{}次): {}: {}", max_retries, path, last_error);
                    }
                }
            }
        }

        Err(format!("{}: {}", path, last_error))
    }

    async fn copy_once(
        path: &str,
        source: &dyn Storage,
        dest: &dyn Storage,
    ) -> anyhow::Result<u64> {
        debug!("复制: {}", path);

        let data = source.read(path).await?;
        let bytes = data.len() as u64;
        dest.write(path, data).await?;

        // 把源侧修改时间写到目标侧，否则下一次分析会把刚同步的文件
        // 再次判为较新。回写失败只降低后续分析精度，不算传输失败。
        match source.stat(path).await {
            Ok(Some(meta)) if meta.modified_time > 0 => {
                if let Err(e) = dest.set_modified(path, meta.modified_time).await {
                    warn!("修改时间回写失败: {}: {}", path, e);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("源侧元数据查询失败: {}: {}", path, e),
        }

        Ok(bytes)
    }
}
