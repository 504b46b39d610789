//! 进度上报
//!
//! 核心在粗粒度的节点（扫描开始/完成、比较完成、传输进度）同步调用注入的
//! 回调。是否节流、如何跨线程分发由调用方自行决定。

use tokio::sync::mpsc;

/// 状态消息接收器
pub trait StatusSink: Send + Sync {
    fn report(&self, message: &str);
}

/// 丢弃所有消息的接收器
pub struct NullSink;

impl StatusSink for NullSink {
    fn report(&self, _message: &str) {}
}

/// 把闭包包装成接收器
pub struct FnSink<F>(pub F);

impl<F> StatusSink for FnSink<F>
where
    F: Fn(&str) + Send + Sync,
{
    fn report(&self, message: &str) {
        (self.0)(message)
    }
}

/// 基于通道的接收器，界面侧在另一端消费
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StatusSink for ChannelSink {
    fn report(&self, message: &str) {
        // 接收端关闭时静默丢弃
        let _ = self.tx.send(message.to_string());
    }
}
