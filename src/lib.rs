//! 本地目录与 SFTP 目录的比较与方向同步核心
//!
//! 工作流：排除规则配置两侧扫描器 → 扫描产出两份快照 → 远程时钟校正
//! 归一化远程时间戳 → 比较器给出方向推荐 → （确认后）计划器重新扫描
//! 并产出传输/删除计划 → 执行器落盘。所有快照只存在于内存，每次运行
//! 重建，核心不持有任何落盘状态。

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod progress;
pub mod remote;
pub mod storage;

pub use config::{ConnectionConfig, ExclusionConfig, SyncProfile};
pub use core::{
    AnalysisMode, ComparisonResult, Recommendation, SyncDirection, SyncEngine, SyncPlan,
    SyncReport,
};
pub use error::{Result, SyncError};
pub use progress::{ChannelSink, FnSink, NullSink, StatusSink};

/// 平台配置目录
pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            // Linux
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        }
    }
}
