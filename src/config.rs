//! 应用配置模块

use crate::core::comparator::AnalysisMode;
use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 远程连接参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    /// 密码认证（SFTP 数据通道仅支持密钥认证，见 validate）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// 私钥文件路径
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    /// 是否校验服务器主机密钥
    #[serde(default = "default_verify_host_key")]
    pub verify_host_key: bool,
    /// 连接超时（秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_port() -> u16 {
    22
}

fn default_verify_host_key() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    15
}

impl ConnectionConfig {
    /// 实际使用的连接超时，限制在 10-30 秒之间
    pub fn effective_connect_timeout(&self) -> u64 {
        self.connect_timeout_secs.clamp(10, 30)
    }
}

/// 排除列表配置
///
/// 四类列表相互独立；同步排除项会在构造 [`ExclusionRules`] 时自动并入
/// 分析排除项，保证"对同步隐藏的文件绝不会在分析中重新出现"。
///
/// [`ExclusionRules`]: crate::core::filter::ExclusionRules
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExclusionConfig {
    /// 从同步中排除的扩展名（不含点）
    pub extensions_from_sync: Vec<String>,
    /// 仅从分析中排除的扩展名
    pub extensions_from_analysis: Vec<String>,
    /// 从同步中排除的目录名（隐含从分析中排除）
    pub folders_from_sync: Vec<String>,
    /// 仅从分析中排除的目录名（只影响展示，不影响实际传输）
    pub folders_from_analysis: Vec<String>,
    /// 从同步中排除的文件名
    pub files_from_sync: Vec<String>,
    /// 仅从分析中排除的文件名
    pub files_from_analysis: Vec<String>,
}

/// 一个同步项目的完整配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProfile {
    pub name: String,
    /// 本地根目录
    pub local_path: String,
    /// 远程根目录（绝对路径）
    pub remote_path: String,
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub exclusions: ExclusionConfig,
    #[serde(default)]
    pub mode: AnalysisMode,
}

impl SyncProfile {
    /// 校验必填项，失败的配置在任何扫描开始前即被拒绝
    pub fn validate(&self) -> Result<()> {
        if self.local_path.trim().is_empty() {
            return Err(SyncError::Config("本地目录未设置".to_string()));
        }
        if self.remote_path.trim().is_empty() {
            return Err(SyncError::Config("远程目录未设置".to_string()));
        }
        if self.connection.host.trim().is_empty() {
            return Err(SyncError::Config("远程主机未设置".to_string()));
        }
        if self.connection.username.trim().is_empty() {
            return Err(SyncError::Config("远程用户名未设置".to_string()));
        }
        if self.connection.private_key.is_none() && self.connection.password.is_some() {
            // SFTP 数据通道基于密钥/代理认证，纯密码无法建立
            return Err(SyncError::Config(
                "SFTP 仅支持密钥认证，请配置私钥文件（密码字段会被忽略）".to_string(),
            ));
        }
        Ok(())
    }

    /// 从 JSON 配置文件加载
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("读取配置文件失败: {}", e)))?;
        let profile: SyncProfile = serde_json::from_str(&content)
            .map_err(|e| SyncError::Config(format!("解析配置文件失败: {}", e)))?;
        profile.validate()?;
        Ok(profile)
    }

    /// 保存为 JSON 配置文件
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| SyncError::Config(format!("序列化配置失败: {}", e)))?;
        fs::write(path, content)
            .map_err(|e| SyncError::Config(format!("写入配置文件失败: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_profile() -> SyncProfile {
        SyncProfile {
            name: "demo".to_string(),
            local_path: "/home/user/docs".to_string(),
            remote_path: "/srv/docs".to_string(),
            connection: ConnectionConfig {
                host: "example.com".to_string(),
                port: 22,
                username: "user".to_string(),
                password: None,
                private_key: Some("/home/user/.ssh/id_ed25519".to_string()),
                verify_host_key: true,
                connect_timeout_secs: 15,
            },
            exclusions: ExclusionConfig::default(),
            mode: AnalysisMode::Full,
        }
    }

    #[test]
    fn test_validate_ok() {
        assert!(sample_profile().validate().is_ok());
    }

    #[test]
    fn test_validate_missing_local_path() {
        let mut profile = sample_profile();
        profile.local_path = "  ".to_string();
        let err = profile.validate().unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_validate_password_only_rejected() {
        let mut profile = sample_profile();
        profile.connection.private_key = None;
        profile.connection.password = Some("secret".to_string());
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_connect_timeout_clamped() {
        let mut conn = sample_profile().connection;
        conn.connect_timeout_secs = 3;
        assert_eq!(conn.effective_connect_timeout(), 10);
        conn.connect_timeout_secs = 120;
        assert_eq!(conn.effective_connect_timeout(), 30);
        conn.connect_timeout_secs = 20;
        assert_eq!(conn.effective_connect_timeout(), 20);
    }

    #[test]
    fn test_profile_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");
        let profile = sample_profile();
        profile.save(&path).unwrap();

        let loaded = SyncProfile::load(&path).unwrap();
        assert_eq!(loaded.name, profile.name);
        assert_eq!(loaded.connection.host, profile.connection.host);
        assert_eq!(loaded.mode, AnalysisMode::Full);
    }
}
