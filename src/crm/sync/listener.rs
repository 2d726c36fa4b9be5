//! 离线队列监听器回调接口

use async_trait::async_trait;

/// 离线队列监听器回调接口
#[async_trait]
pub trait SyncListener: Send + Sync {
    /// 新变更入队
    async fn on_change_enqueued(&self, id: i64, kind: String);

    /// drain 开始
    async fn on_drain_start(&self);

    /// 单条变更已应用并从本地删除
    async fn on_change_applied(&self, id: i64);

    /// 单条变更应用失败
    async fn on_drain_failed(&self, id: i64, message: String);

    /// drain 结束，参数为本次应用数与剩余数
    async fn on_drain_finish(&self, applied: usize, remaining: i64);
}

/// 默认空实现（无操作）
pub struct EmptySyncListener;

#[async_trait]
impl SyncListener for EmptySyncListener {
    async fn on_change_enqueued(&self, _id: i64, _kind: String) {}
    async fn on_drain_start(&self) {}
    async fn on_change_applied(&self, _id: i64) {}
    async fn on_drain_failed(&self, _id: i64, _message: String) {}
    async fn on_drain_finish(&self, _applied: usize, _remaining: i64) {}
}
