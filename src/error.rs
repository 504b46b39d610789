//! 错误类型定义
//!
//! 分析/同步流程中所有可向调用方呈现的错误，均带有简短的中文描述，
//! 可直接用于界面展示。

use thiserror::Error;

/// 核心错误分类
#[derive(Debug, Error)]
pub enum SyncError {
    /// 配置缺失或非法，在任何扫描开始前返回
    #[error("配置无效: {0}")]
    Config(String),

    /// 本地路径不可达，或远程连接/认证/列表失败
    #[error("扫描失败: {0}")]
    Scan(String),

    /// Git 模式下本地或远程仓库查询失败
    #[error("Git 查询失败: {0}")]
    Git(String),

    /// 用户取消，不视为失败
    #[error("操作已取消")]
    Cancelled,

    /// 其他底层错误
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    /// 是否为用户取消（取消与失败在界面上区分展示）
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }
}

/// 核心模块统一返回类型
pub type Result<T> = std::result::Result<T, SyncError>;
