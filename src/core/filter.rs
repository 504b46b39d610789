//! 排除规则
//!
//! 判断某个文件/目录是否参与分析或同步。内置默认排除项（版本控制元数据、
//! 包管理缓存、构建输出、IDE 状态目录、系统元数据文件）在构造时无条件并入，
//! 不受用户配置影响。

use crate::config::ExclusionConfig;
use std::collections::HashSet;

/// 内置排除目录：版本控制、包缓存、构建输出、IDE 状态
const BUILTIN_FOLDERS: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    "node_modules",
    "__pycache__",
    "target",
    "bin",
    "obj",
    "dist",
    ".idea",
    ".vs",
    ".vscode",
];

/// 内置排除文件：操作系统元数据
const BUILTIN_FILES: &[&str] = &[".ds_store", "thumbs.db", "desktop.ini"];

/// 内置排除扩展名：临时文件
const BUILTIN_EXTENSIONS: &[&str] = &["tmp", "temp"];

/// 规则适用范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// 分析（展示/推荐），排除范围是同步排除的超集
    Analysis,
    /// 同步（实际传输的路径集合）
    Sync,
}

/// 被判断对象的类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Folder,
}

/// 合并后的排除规则集合
///
/// 所有集合均为小写；不变量：分析排除恒为同步排除的超集，
/// 因此被同步排除的文件不会在分析结果里重新出现为"待同步"。
#[derive(Debug, Clone)]
pub struct ExclusionRules {
    ext_sync: HashSet<String>,
    ext_analysis: HashSet<String>,
    folders_sync: HashSet<String>,
    folders_analysis: HashSet<String>,
    files_sync: HashSet<String>,
    files_analysis: HashSet<String>,
}

fn lowered(items: &[String]) -> impl Iterator<Item = String> + '_ {
    items
        .iter()
        .map(|s| s.trim().trim_start_matches('.').to_lowercase())
        .filter(|s| !s.is_empty())
}

fn lowered_names(items: &[String]) -> impl Iterator<Item = String> + '_ {
    items
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
}

impl ExclusionRules {
    /// 由用户配置构造，并入内置默认项，同时把同步排除并入分析排除
    pub fn new(config: &ExclusionConfig) -> Self {
        let mut ext_sync: HashSet<String> = lowered(&config.extensions_from_sync).collect();
        ext_sync.extend(BUILTIN_EXTENSIONS.iter().map(|s| s.to_string()));

        let mut ext_analysis: HashSet<String> = lowered(&config.extensions_from_analysis).collect();
        ext_analysis.extend(ext_sync.iter().cloned());

        let mut folders_sync: HashSet<String> = lowered_names(&config.folders_from_sync).collect();
        folders_sync.extend(BUILTIN_FOLDERS.iter().map(|s| s.to_string()));

        let mut folders_analysis: HashSet<String> =
            lowered_names(&config.folders_from_analysis).collect();
        folders_analysis.extend(folders_sync.iter().cloned());

        let mut files_sync: HashSet<String> = lowered_names(&config.files_from_sync).collect();
        files_sync.extend(BUILTIN_FILES.iter().map(|s| s.to_string()));

        let mut files_analysis: HashSet<String> =
            lowered_names(&config.files_from_analysis).collect();
        files_analysis.extend(files_sync.iter().cloned());

        Self {
            ext_sync,
            ext_analysis,
            folders_sync,
            folders_analysis,
            files_sync,
            files_analysis,
        }
    }

    /// 判断一个名字（文件名或目录名，不含路径）是否被排除
    pub fn should_exclude(&self, name: &str, kind: EntryKind, purpose: Purpose) -> bool {
        let name_lower = name.to_lowercase();

        match kind {
            EntryKind::Folder => match purpose {
                Purpose::Analysis => self.folders_analysis.contains(&name_lower),
                Purpose::Sync => self.folders_sync.contains(&name_lower),
            },
            EntryKind::File => {
                let files = match purpose {
                    Purpose::Analysis => &self.files_analysis,
                    Purpose::Sync => &self.files_sync,
                };
                if files.contains(&name_lower) {
                    return true;
                }

                let exts = match purpose {
                    Purpose::Analysis => &self.ext_analysis,
                    Purpose::Sync => &self.ext_sync,
                };
                match name_lower.rsplit_once('.') {
                    Some((stem, ext)) if !stem.is_empty() => exts.contains(ext),
                    _ => false,
                }
            }
        }
    }

    /// 判断一条相对路径是否被排除：任一父目录命中目录排除，
    /// 或文件名本身命中文件/扩展名排除
    pub fn is_path_excluded(&self, rel_path: &str, kind: EntryKind, purpose: Purpose) -> bool {
        let mut components = rel_path.split('/').filter(|c| !c.is_empty()).peekable();

        while let Some(component) = components.next() {
            let is_last = components.peek().is_none();
            let component_kind = if is_last { kind } else { EntryKind::Folder };
            if self.should_exclude(component, component_kind, purpose) {
                return true;
            }
        }
        false
    }
}

impl Default for ExclusionRules {
    fn default() -> Self {
        Self::new(&ExclusionConfig::default())
    }
}
