//! 远程时钟校正
//!
//! SFTP 列表返回的时间戳可能带有服务器本地时区或精度问题。本模块在远程
//! 扫描之后，通过命令通道分批执行 stat，取回每个文件权威的 UTC 秒，
//! 覆盖快照里的时间。任何失败都只降低精度，绝不让整次分析失败。

use crate::core::scanner::TreeSnapshot;
use crate::remote::shell::{shell_quote, CommandChannel};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// 单条命令携带的最大路径数，避免超出传输载荷限制
pub const STAT_BATCH_SIZE: usize = 50;

/// stat 命令语法，GNU 与 BSD 系服务器不同
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatSyntax {
    Gnu,
    Bsd,
}

/// 远程时钟校正器
pub struct ClockCorrector;

impl ClockCorrector {
    /// 就地校正快照中的时间戳，返回成功校正的文件数。
    ///
    /// 整批失败时退化为该批内逐个文件查询；单行解析失败或取到 0 时
    /// 保留原时间。本函数从不返回错误。
    pub async fn correct(
        channel: &dyn CommandChannel,
        remote_root: &str,
        snapshot: &mut TreeSnapshot,
        cancel_flag: &AtomicBool,
    ) -> usize {
        let mut paths: Vec<String> = snapshot.keys().cloned().collect();
        paths.sort();

        if paths.is_empty() {
            return 0;
        }

        info!(
            "开始校正远程时间戳: {} 个文件, 每批最多 {} 个",
            paths.len(),
            STAT_BATCH_SIZE
        );

        let mut corrected = 0;

        for batch in paths.chunks(STAT_BATCH_SIZE) {
            if cancel_flag.load(Ordering::Relaxed) {
                debug!("时钟校正被取消，剩余文件保留原时间");
                break;
            }

            let epochs = match Self::query_batch(channel, remote_root, batch, StatSyntax::Gnu).await
            {
                Some(e) => Some(e),
                None => Self::query_batch(channel, remote_root, batch, StatSyntax::Bsd).await,
            };

            match epochs {
                Some(epochs) => {
                    for (path, epoch) in batch.iter().zip(epochs) {
                        if let Some(epoch) = epoch {
                            if let Some(entry) = snapshot.get_mut(path) {
                                entry.modified_time = epoch;
                                corrected += 1;
                            }
                        }
                    }
                }
                None => {
                    // 整批命令失败：本批内退化为逐文件查询
                    warn!("批量 stat 失败，本批 {} 个文件逐个查询", batch.len());
                    for path in batch {
                        if cancel_flag.load(Ordering::Relaxed) {
                            break;
                        }
                        if let Some(epoch) = Self::query_single(channel, remote_root, path).await {
                            if let Some(entry) = snapshot.get_mut(path) {
                                entry.modified_time = epoch;
                                corrected += 1;
                            }
                        }
                    }
                }
            }
        }

        info!("时间戳校正完成: {}/{} 个文件", corrected, paths.len());
        corrected
    }

    /// 一次往返查询一批文件；命令失败或行数对不上时返回 None
    async fn query_batch(
        channel: &dyn CommandChannel,
        remote_root: &str,
        batch: &[String],
        syntax: StatSyntax,
    ) -> Option<Vec<Option<i64>>> {
        let command = Self::build_stat_command(remote_root, batch, syntax);

        let output = match channel.run(&command).await {
            Ok(o) => o,
            Err(e) => {
                debug!("stat 命令执行失败: {}", e);
                return None;
            }
        };
        if !output.success() {
            debug!("stat 命令退出码 {}: {}", output.exit_code, output.stderr.trim());
            return None;
        }

        Self::parse_epoch_lines(&output.stdout, batch.len())
    }

    async fn query_single(
        channel: &dyn CommandChannel,
        remote_root: &str,
        path: &str,
    ) -> Option<i64> {
        for syntax in [StatSyntax::Gnu, StatSyntax::Bsd] {
            let command = Self::build_stat_command(remote_root, std::slice::from_ref(&path.to_string()), syntax);
            if let Ok(output) = channel.run(&command).await {
                if output.success() {
                    if let Some(epochs) = Self::parse_epoch_lines(&output.stdout, 1) {
                        if let Some(Some(epoch)) = epochs.first() {
                            return Some(*epoch);
                        }
                    }
                }
            }
        }
        debug!("无法取得权威时间戳，保留原值: {}", path);
        None
    }

    fn build_stat_command(remote_root: &str, paths: &[String], syntax: StatSyntax) -> String {
        let format_args = match syntax {
            StatSyntax::Gnu => "-c %Y",
            StatSyntax::Bsd => "-f %m",
        };
        let quoted: Vec<String> = paths.iter().map(|p| shell_quote(p)).collect();
        // -- 之后的参数一律按文件名处理，以 - 开头的文件名不会被当成选项
        format!(
            "cd {} && stat {} -- {}",
            shell_quote(remote_root),
            format_args,
            quoted.join(" ")
        )
    }

    /// 逐行解析 epoch 秒。行数与文件数不一致说明输出无法对齐，整批作废；
    /// 单行解析失败或为 0 时该文件保留原时间（None）。
    fn parse_epoch_lines(stdout: &str, expected: usize) -> Option<Vec<Option<i64>>> {
        let lines: Vec<&str> = stdout.lines().map(|l| l.trim()).filter(|l| !l.is_empty()).collect();
        if lines.len() != expected {
            debug!("stat 输出 {} 行，期望 {} 行", lines.len(), expected);
            return None;
        }

        Some(
            lines
                .into_iter()
                .map(|line| match line.parse::<i64>() {
                    Ok(epoch) if epoch > 0 => Some(epoch),
                    _ => None,
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scanner::FileEntry;
    use crate::remote::shell::CommandOutput;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    type Responder = Box<dyn Fn(&str) -> CommandOutput + Send + Sync>;

    struct FakeChannel {
        responder: Responder,
        commands: Mutex<Vec<String>>,
    }

    impl FakeChannel {
        fn new(responder: Responder) -> Self {
            Self {
                responder,
                commands: Mutex::new(Vec::new()),
            }
        }

        fn command_count(&self) -> usize {
            self.commands.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CommandChannel for FakeChannel {
        async fn run(&self, command: &str) -> Result<CommandOutput> {
            self.commands.lock().unwrap().push(command.to_string());
            Ok((self.responder)(command))
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    fn ok(stdout: &str) -> CommandOutput {
        CommandOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    fn failed() -> CommandOutput {
        CommandOutput {
            stdout: String::new(),
            stderr: "stat: illegal option".to_string(),
            exit_code: 1,
        }
    }

    fn snapshot_of(paths: &[&str]) -> TreeSnapshot {
        paths
            .iter()
            .map(|p| {
                (
                    p.to_string(),
                    FileEntry {
                        path: p.to_string(),
                        modified_time: 100,
                        size: 1,
                    },
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_batch_correction_overwrites_times() {
        let channel = FakeChannel::new(Box::new(|_| ok("1700000001\n1700000002\n")));
        let mut snapshot = snapshot_of(&["a.txt", "b.txt"]);
        let cancel = AtomicBool::new(false);

        let corrected = ClockCorrector::correct(&channel, "/srv/data", &mut snapshot, &cancel).await;

        assert_eq!(corrected, 2);
        // 路径按排序处理：a.txt 在前
        assert_eq!(snapshot["a.txt"].modified_time, 1_700_000_001);
        assert_eq!(snapshot["b.txt"].modified_time, 1_700_000_002);
        assert_eq!(channel.command_count(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_and_zero_lines_keep_original() {
        let channel = FakeChannel::new(Box::new(|_| ok("garbage\n0\n1700000009\n")));
        let mut snapshot = snapshot_of(&["a.txt", "b.txt", "c.txt"]);
        let cancel = AtomicBool::new(false);

        let corrected = ClockCorrector::correct(&channel, "/srv", &mut snapshot, &cancel).await;

        assert_eq!(corrected, 1);
        assert_eq!(snapshot["a.txt"].modified_time, 100);
        assert_eq!(snapshot["b.txt"].modified_time, 100);
        assert_eq!(snapshot["c.txt"].modified_time, 1_700_000_009);
    }

    #[tokio::test]
    async fn test_gnu_failure_falls_back_to_bsd() {
        let channel = FakeChannel::new(Box::new(|cmd| {
            if cmd.contains("-c %Y") {
                failed()
            } else {
                ok("1700000100\n")
            }
        }));
        let mut snapshot = snapshot_of(&["a.txt"]);
        let cancel = AtomicBool::new(false);

        let corrected = ClockCorrector::correct(&channel, "/srv", &mut snapshot, &cancel).await;

        assert_eq!(corrected, 1);
        assert_eq!(snapshot["a.txt"].modified_time, 1_700_000_100);
    }

    #[tokio::test]
    async fn test_whole_batch_failure_degrades_to_per_file() {
        // 批量命令（多个路径）一律失败，单文件命令成功
        let channel = FakeChannel::new(Box::new(|cmd| {
            let quoted_paths = cmd.matches(".txt'").count();
            if quoted_paths > 1 {
                failed()
            } else {
                ok("1700000200\n")
            }
        }));
        let mut snapshot = snapshot_of(&["a.txt", "b.txt"]);
        let cancel = AtomicBool::new(false);

        let corrected = ClockCorrector::correct(&channel, "/srv", &mut snapshot, &cancel).await;

        assert_eq!(corrected, 2);
        assert_eq!(snapshot["a.txt"].modified_time, 1_700_000_200);
        assert_eq!(snapshot["b.txt"].modified_time, 1_700_000_200);
    }

    #[tokio::test]
    async fn test_large_tree_is_batched() {
        let channel = FakeChannel::new(Box::new(|cmd| {
            let count = cmd.matches(".txt'").count();
            assert!(count <= STAT_BATCH_SIZE);
            ok(&"1700000300\n".repeat(count))
        }));

        let names: Vec<String> = (0..120).map(|i| format!("f{:03}.txt", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut snapshot = snapshot_of(&refs);
        let cancel = AtomicBool::new(false);

        let corrected = ClockCorrector::correct(&channel, "/srv", &mut snapshot, &cancel).await;

        assert_eq!(corrected, 120);
        // 120 个文件 -> 3 批
        assert_eq!(channel.command_count(), 3);
    }

    #[tokio::test]
    async fn test_dash_leading_filename_stays_after_separator() {
        // 以 - 开头的文件名必须落在 -- 之后，否则 stat 会把它当成选项
        let channel = FakeChannel::new(Box::new(|cmd| {
            assert!(
                cmd.contains("stat -c %Y -- ") || cmd.contains("stat -f %m -- "),
                "命令缺少 -- 分隔符: {}",
                cmd
            );
            if cmd.contains("-- '-rc.conf'") {
                ok("1700000600\n")
            } else {
                failed()
            }
        }));
        let mut snapshot = snapshot_of(&["-rc.conf"]);
        let cancel = AtomicBool::new(false);

        let corrected = ClockCorrector::correct(&channel, "/srv", &mut snapshot, &cancel).await;

        assert_eq!(corrected, 1);
        assert_eq!(snapshot["-rc.conf"].modified_time, 1_700_000_600);
    }

    #[tokio::test]
    async fn test_cancelled_stops_early_without_error() {
        let channel = FakeChannel::new(Box::new(|_| ok("1700000400\n")));
        let mut snapshot = snapshot_of(&["a.txt"]);
        let cancel = AtomicBool::new(true);

        let corrected = ClockCorrector::correct(&channel, "/srv", &mut snapshot, &cancel).await;

        assert_eq!(corrected, 0);
        assert_eq!(snapshot["a.txt"].modified_time, 100);
        assert_eq!(channel.command_count(), 0);
    }
}
