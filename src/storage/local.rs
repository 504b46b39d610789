use super::{FileInfo, FileMeta, Storage};
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use walkdir::WalkDir;

/// 临时文件序号，保证并发写入时每次落到不同的临时路径
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

pub struct LocalStorage {
    base_path: PathBuf,
    name: String,
}

impl LocalStorage {
    pub fn new(path: &str) -> Result<Self> {
        let base_path = PathBuf::from(path);
        let name = format!("local:{}", path);
        Ok(Self { base_path, name })
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = path.trim_start_matches('/').trim_start_matches('\\');
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }

    /// 规范化路径分隔符（统一使用 /）
    fn normalize_path(path: &str) -> String {
        path.replace('\\', "/")
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn list_files(
        &self,
        prefix: Option<&str>,
        max_depth: Option<usize>,
    ) -> Result<Vec<FileInfo>> {
        let base = prefix.map_or_else(|| self.base_path.clone(), |p| self.resolve_path(p));

        if !base.exists() {
            anyhow::bail!("本地目录不存在: {}", base.display());
        }

        let base_path = self.base_path.clone();

        // 使用 spawn_blocking 避免阻塞 async runtime
        let entries: Vec<FileInfo> = tokio::task::spawn_blocking(move || {
            let mut walker = WalkDir::new(&base).follow_links(false);
            if let Some(depth) = max_depth {
                walker = walker.max_depth(depth);
            }

            walker
                .into_iter()
                .filter_map(|e| e.ok())
                .filter_map(|entry| {
                    let path = entry.path();
                    let metadata = entry.metadata().ok()?;

                    let relative_path = path.strip_prefix(&base_path).ok()?.to_str()?.to_string();

                    // 跳过根目录本身
                    if relative_path.is_empty() {
                        return None;
                    }

                    let modified = metadata
                        .modified()
                        .ok()?
                        .duration_since(std::time::UNIX_EPOCH)
                        .ok()?
                        .as_secs() as i64;

                    Some(FileInfo {
                        path: Self::normalize_path(&relative_path),
                        size: if metadata.is_dir() { 0 } else { metadata.len() },
                        modified_time: modified,
                        is_dir: metadata.is_dir(),
                    })
                })
                .collect()
        })
        .await?;

        Ok(entries)
    }

    async fn stat(&self, path: &str) -> Result<Option<FileMeta>> {
        let full_path = self.resolve_path(path);

        match fs::metadata(&full_path).await {
            Ok(metadata) => {
                let modified = metadata
                    .modified()?
                    .duration_since(std::time::UNIX_EPOCH)?
                    .as_secs() as i64;

                Ok(Some(FileMeta {
                    size: if metadata.is_dir() { 0 } else { metadata.len() },
                    modified_time: modified,
                    is_dir: metadata.is_dir(),
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let data = fs::read(self.resolve_path(path)).await?;
        Ok(data)
    }

    async fn write(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let full_path = self.resolve_path(path);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // 使用临时文件写入，然后原子重命名。临时名在原文件名后追加
        // 进程号与序号：with_extension 会替换扩展名，同主干的文件
        // （如 foo.c 与 foo.h）并发写入时会撞到同一个临时路径
        let file_name = full_path
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("非法的写入路径: {}", path))?
            .to_string_lossy()
            .into_owned();
        let nonce = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_path = full_path.with_file_name(format!(
            "{}.{}.{}.tmp",
            file_name,
            std::process::id(),
            nonce
        ));

        fs::write(&temp_path, data).await?;
        if let Err(e) = fs::rename(&temp_path, &full_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.resolve_path(path);

        if !full_path.exists() {
            return Ok(());
        }

        if full_path.is_dir() {
            fs::remove_dir_all(&full_path).await?;
        } else {
            fs::remove_file(&full_path).await?;
        }

        Ok(())
    }

    async fn set_modified(&self, path: &str, mtime: i64) -> Result<()> {
        let full_path = self.resolve_path(path);

        tokio::task::spawn_blocking(move || {
            let time = filetime::FileTime::from_unix_time(mtime, 0);
            filetime::set_file_mtime(&full_path, time)
        })
        .await??;

        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_files_missing_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let storage = LocalStorage::new(missing.to_str().unwrap()).unwrap();
        assert!(storage.list_files(None, None).await.is_err());
    }

    #[tokio::test]
    async fn test_write_read_and_set_modified() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().to_str().unwrap()).unwrap();

        storage
            .write("sub/hello.txt", b"hello".to_vec())
            .await
            .unwrap();
        let data = storage.read("sub/hello.txt").await.unwrap();
        assert_eq!(data, b"hello");

        storage.set_modified("sub/hello.txt", 1_700_000_000).await.unwrap();
        let meta = storage.stat("sub/hello.txt").await.unwrap().unwrap();
        assert_eq!(meta.modified_time, 1_700_000_000);
        assert_eq!(meta.size, 5);
    }

    #[tokio::test]
    async fn test_concurrent_same_stem_writes_do_not_collide() {
        // foo.c 与 foo.h 主干相同，并发写入时必须各走各的临时文件，
        // 否则一侧会拿到另一侧的内容或者重命名失败
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().to_str().unwrap()).unwrap();

        for _ in 0..50 {
            let (ra, rb) = tokio::join!(
                storage.write("foo.c", b"content-of-c".to_vec()),
                storage.write("foo.h", b"content-of-h".to_vec())
            );
            ra.unwrap();
            rb.unwrap();

            assert_eq!(storage.read("foo.c").await.unwrap(), b"content-of-c");
            assert_eq!(storage.read("foo.h").await.unwrap(), b"content-of-h");
        }
    }

    #[tokio::test]
    async fn test_list_files_respects_max_depth() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("root.txt"), b"r").unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/level1.txt"), b"1").unwrap();
        std::fs::write(dir.path().join("a/b/level2.txt"), b"2").unwrap();

        let storage = LocalStorage::new(dir.path().to_str().unwrap()).unwrap();

        let shallow = storage.list_files(None, Some(2)).await.unwrap();
        let paths: Vec<_> = shallow.iter().map(|f| f.path.as_str()).collect();
        assert!(paths.contains(&"root.txt"));
        assert!(paths.contains(&"a/level1.txt"));
        assert!(!paths.contains(&"a/b/level2.txt"));

        let full = storage.list_files(None, None).await.unwrap();
        assert!(full.iter().any(|f| f.path == "a/b/level2.txt"));
    }
}
