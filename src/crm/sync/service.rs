//! 离线变更队列服务层
//!
//! 断网期间的写操作先落盘，网络由离线恢复在线时按 id 升序重放。
//! 默认策略下遇到第一个失败即停止，后续变更保持原顺序等待下一次触发。

use crate::crm::error::{CrmError, CrmResult};
use crate::crm::sync::api::RemoteApplier;
use crate::crm::sync::connectivity::{connectivity_edge, ConnectivityEdge, ConnectivitySignal};
use crate::crm::sync::dao::PendingChangeDao;
use crate::crm::sync::listener::{EmptySyncListener, SyncListener};
use crate::crm::sync::models::{
    DrainFailure, DrainPolicy, DrainReport, Mutation, OfflineQueueConfig, PendingChange,
    QueueState, SkipReason,
};
use chrono::Utc;
use sqlx::{Pool, Sqlite};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

/// 离线变更队列
pub struct OfflineMutationQueue {
    config: OfflineQueueConfig,
    dao: PendingChangeDao,
    applier: Arc<dyn RemoteApplier>,
    connectivity: ConnectivitySignal,
    draining: AtomicBool,
    /// 上一次观察到的连通性，初始为离线
    last_online: Mutex<bool>,
    listener: Arc<dyn SyncListener>,
}

/// drain 结束时复位 Draining 标志（包括出错提前返回）
struct DrainingGuard<'a>(&'a AtomicBool);

impl Drop for DrainingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl OfflineMutationQueue {
    /// 创建离线队列（使用默认空监听器）
    pub fn new(
        config: OfflineQueueConfig,
        db: Pool<Sqlite>,
        applier: Arc<dyn RemoteApplier>,
        connectivity: ConnectivitySignal,
    ) -> Self {
        Self::with_listener(config, db, applier, connectivity, Arc::new(EmptySyncListener))
    }

    /// 创建离线队列（带自定义监听器）
    pub fn with_listener(
        config: OfflineQueueConfig,
        db: Pool<Sqlite>,
        applier: Arc<dyn RemoteApplier>,
        connectivity: ConnectivitySignal,
        listener: Arc<dyn SyncListener>,
    ) -> Self {
        Self {
            config,
            dao: PendingChangeDao::new(db),
            applier,
            connectivity,
            draining: AtomicBool::new(false),
            last_online: Mutex::new(false),
            listener,
        }
    }

    /// 入队：写入本地存储并分配下一个 id
    pub async fn enqueue(&self, mutation: Mutation) -> CrmResult<PendingChange> {
        let (kind, data) = mutation
            .to_parts()
            .map_err(|e| CrmError::Storage(format!("序列化变更失败: {}", e)))?;
        let enqueued_at = Utc::now().timestamp_millis();

        let id = self
            .dao
            .insert(&kind, &data, enqueued_at)
            .await
            .map_err(|e| {
                error!("[SyncQueue] ❌ 变更入队失败（type={}）: {:#}", kind, e);
                CrmError::storage(e)
            })?;

        info!("[SyncQueue] 📥 变更入队 id={}, type={}", id, kind);
        self.listener.on_change_enqueued(id, kind).await;
        Ok(PendingChange {
            id,
            mutation,
            enqueued_at,
        })
    }

    /// 处理一次连通性上报；只有离线→在线的跳变会触发 drain
    pub async fn on_connectivity(&self, online: bool) -> CrmResult<Option<DrainReport>> {
        let edge = {
            let mut last = self.last_online.lock().unwrap_or_else(PoisonError::into_inner);
            let edge = connectivity_edge(*last, online);
            *last = online;
            edge
        };

        match edge {
            ConnectivityEdge::CameOnline => {
                info!("[SyncQueue] 🌐 网络恢复，开始重放离线变更");
                self.drain().await.map(Some)
            }
            ConnectivityEdge::WentOffline => {
                info!("[SyncQueue] 📴 网络断开，后续变更将进入离线队列");
                Ok(None)
            }
            ConnectivityEdge::Unchanged => Ok(None),
        }
    }

    /// 按 id 升序重放所有待同步变更
    ///
    /// 离线或已在 drain 中时为空操作。返回的错误只可能来自本地存储；
    /// 远端失败记录在 `DrainReport::failures` 中。
    pub async fn drain(&self) -> CrmResult<DrainReport> {
        if !self.connectivity.is_online() {
            debug!("[SyncQueue] 当前离线，跳过 drain");
            return Ok(DrainReport::skipped(SkipReason::Offline));
        }
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("[SyncQueue] 已在 drain 中，忽略重复触发");
            return Ok(DrainReport::skipped(SkipReason::AlreadyDraining));
        }
        let _guard = DrainingGuard(&self.draining);

        self.listener.on_drain_start().await;
        let report = self.walk().await.map_err(|e| {
            error!("[SyncQueue] ❌ drain 因本地存储错误中止: {}", e);
            e
        })?;

        info!(
            "[SyncQueue] ✅ drain 结束，成功: {}, 失败: {}, 剩余: {}",
            report.applied.len(),
            report.failures.len(),
            report.remaining
        );
        self.listener
            .on_drain_finish(report.applied.len(), report.remaining)
            .await;
        Ok(report)
    }

    async fn walk(&self) -> CrmResult<DrainReport> {
        let mut report = DrainReport::default();
        let mut cursor = 0;

        // 每次都重新读取队头，drain 期间新入队的变更也会按 id 顺序被处理
        while let Some(change) = self
            .dao
            .first_after(cursor)
            .await
            .map_err(CrmError::storage)?
        {
            cursor = change.id;
            match self.applier.apply(&change).await {
                Ok(()) => {
                    self.dao.delete(change.id).await.map_err(CrmError::storage)?;
                    debug!("[SyncQueue]   变更 id={} 已同步", change.id);
                    report.applied.push(change.id);
                    self.listener.on_change_applied(change.id).await;
                }
                Err(e) => {
                    let unauthorized = matches!(e, CrmError::Unauthorized(_));
                    warn!(
                        "[SyncQueue] ⚠️ 变更 id={} (type={}) 同步失败: {}",
                        change.id,
                        change.mutation.kind(),
                        e
                    );
                    report.failures.push(DrainFailure {
                        id: change.id,
                        message: e.to_string(),
                        unauthorized,
                    });
                    self.listener
                        .on_drain_failed(change.id, e.to_string())
                        .await;

                    if unauthorized || self.config.drain_policy == DrainPolicy::StopOnFirstFailure
                    {
                        break;
                    }
                }
            }
        }

        report.remaining = self.dao.count().await.map_err(CrmError::storage)?;
        Ok(report)
    }

    /// 按 id 升序列出待同步变更
    pub async fn pending(&self) -> CrmResult<Vec<PendingChange>> {
        self.dao.list_all().await.map_err(CrmError::storage)
    }

    pub async fn pending_count(&self) -> CrmResult<i64> {
        self.dao.count().await.map_err(CrmError::storage)
    }

    pub fn state(&self) -> QueueState {
        if self.draining.load(Ordering::Acquire) {
            QueueState::Draining
        } else {
            QueueState::Idle
        }
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crm::db::create_sqlite_pool_with_migration;
    use crate::crm::sync::connectivity::ConnectivityObserver;
    use crate::crm::sync::models::{EntityKind, ProjectStatus};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use tokio::sync::Notify;

    /// 可编排失败的远端
    #[derive(Default)]
    struct ScriptedRemote {
        received: std::sync::Mutex<Vec<i64>>,
        failing: std::sync::Mutex<HashSet<i64>>,
        unauthorized: AtomicBool,
        /// 设置后第一次 apply 在返回前等待放行
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
        gate_used: AtomicBool,
    }

    impl ScriptedRemote {
        fn fail(&self, id: i64) {
            self.failing.lock().unwrap().insert(id);
        }

        fn recover(&self, id: i64) {
            self.failing.lock().unwrap().remove(&id);
        }

        fn received(&self) -> Vec<i64> {
            self.received.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteApplier for ScriptedRemote {
        async fn apply(&self, change: &PendingChange) -> CrmResult<()> {
            if let Some((entered, release)) = &self.gate {
                if !self.gate_used.swap(true, Ordering::SeqCst) {
                    entered.notify_one();
                    release.notified().await;
                }
            }
            if self.unauthorized.load(Ordering::SeqCst) {
                return Err(CrmError::Unauthorized("jwt expired".into()));
            }
            if self.failing.lock().unwrap().contains(&change.id) {
                return Err(CrmError::RemoteApply {
                    id: change.id,
                    reason: "HTTP 错误 500".into(),
                });
            }
            self.received.lock().unwrap().push(change.id);
            Ok(())
        }
    }

    struct Harness {
        queue: Arc<OfflineMutationQueue>,
        remote: Arc<ScriptedRemote>,
        observer: ConnectivityObserver,
        pool: Pool<Sqlite>,
    }

    async fn harness_with(remote: ScriptedRemote, policy: DrainPolicy) -> Harness {
        let pool = create_sqlite_pool_with_migration("sqlite::memory:")
            .await
            .unwrap();
        let remote = Arc::new(remote);
        let (observer, signal) = ConnectivityObserver::new(false);
        let queue = Arc::new(OfflineMutationQueue::new(
            OfflineQueueConfig {
                drain_policy: policy,
            },
            pool.clone(),
            remote.clone(),
            signal,
        ));
        Harness {
            queue,
            remote,
            observer,
            pool,
        }
    }

    async fn harness() -> Harness {
        harness_with(ScriptedRemote::default(), DrainPolicy::StopOnFirstFailure).await
    }

    fn status_change(n: i64) -> Mutation {
        Mutation::UpdateProjectStatus {
            project_id: format!("p-{}", n),
            status: ProjectStatus::Scheduled,
        }
    }

    async fn enqueue_n(queue: &OfflineMutationQueue, n: i64) -> Vec<i64> {
        let mut ids = Vec::new();
        for i in 1..=n {
            ids.push(queue.enqueue(status_change(i)).await.unwrap().id);
        }
        ids
    }

    async fn pending_ids(queue: &OfflineMutationQueue) -> Vec<i64> {
        queue
            .pending()
            .await
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect()
    }

    async fn go_online(h: &Harness) -> Option<DrainReport> {
        h.observer.set_online(true);
        h.queue.on_connectivity(true).await.unwrap()
    }

    #[tokio::test]
    async fn drain_delivers_all_in_order_and_empties_table() {
        let h = harness().await;
        let ids = enqueue_n(&h.queue, 5).await;

        let report = go_online(&h).await.unwrap();
        assert_eq!(report.applied, ids);
        assert!(report.failures.is_empty());
        assert_eq!(report.remaining, 0);
        assert_eq!(h.remote.received(), ids);
        assert!(pending_ids(&h.queue).await.is_empty());
    }

    #[tokio::test]
    async fn kth_failure_keeps_k_onwards_in_order() {
        let h = harness().await;
        let ids = enqueue_n(&h.queue, 5).await;
        h.remote.fail(ids[2]);

        let report = go_online(&h).await.unwrap();
        assert_eq!(report.applied, ids[..2].to_vec());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].id, ids[2]);
        assert_eq!(report.remaining, 3);
        assert_eq!(pending_ids(&h.queue).await, ids[2..].to_vec());
    }

    #[tokio::test]
    async fn offline_then_online_scenario() {
        let h = harness().await;
        let ids = enqueue_n(&h.queue, 3).await;
        assert_eq!(ids, vec![1, 2, 3]);
        h.remote.fail(2);

        let first = go_online(&h).await.unwrap();
        assert_eq!(first.applied, vec![1]);
        assert_eq!(pending_ids(&h.queue).await, vec![2, 3]);

        h.remote.recover(2);
        let second = h.queue.drain().await.unwrap();
        assert_eq!(second.applied, vec![2, 3]);
        assert!(pending_ids(&h.queue).await.is_empty());
        assert_eq!(h.remote.received(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn enqueue_fails_with_storage_error_when_store_unavailable() {
        let h = harness().await;
        enqueue_n(&h.queue, 1).await;
        h.pool.close().await;

        let err = h.queue.enqueue(status_change(2)).await.unwrap_err();
        assert!(matches!(err, CrmError::Storage(_)), "got {:?}", err);
        assert!(matches!(
            h.queue.pending_count().await,
            Err(CrmError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn enqueue_rejected_by_store_leaves_queue_untouched() {
        let h = harness().await;
        let ids = enqueue_n(&h.queue, 2).await;
        sqlx::query(
            "CREATE TRIGGER block_insert BEFORE INSERT ON pending_changes BEGIN SELECT RAISE(ABORT, 'disk full'); END",
        )
        .execute(&h.pool)
        .await
        .unwrap();

        let err = h.queue.enqueue(status_change(3)).await.unwrap_err();
        assert!(matches!(err, CrmError::Storage(ref m) if m.contains("disk full")));
        assert_eq!(pending_ids(&h.queue).await, ids);
    }

    #[tokio::test]
    async fn stored_payload_with_extra_fields_survives_reload() {
        let h = harness().await;
        let data = r#"{"name":"Kim","service":"bath","budget":5000}"#;
        h.queue
            .enqueue(Mutation::from_parts("create_lead", data))
            .await
            .unwrap();

        let pending = h.queue.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(
            pending[0].mutation.to_parts().unwrap(),
            ("create_lead".to_string(), data.to_string())
        );
    }

    #[tokio::test]
    async fn drain_is_noop_while_offline() {
        let h = harness().await;
        enqueue_n(&h.queue, 2).await;

        let report = h.queue.drain().await.unwrap();
        assert_eq!(report.skipped, Some(SkipReason::Offline));
        assert!(h.remote.received().is_empty());
        assert_eq!(h.queue.pending_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn only_offline_to_online_edge_triggers_drain() {
        let h = harness().await;
        h.observer.set_online(true);

        assert!(h.queue.on_connectivity(true).await.unwrap().is_some());
        enqueue_n(&h.queue, 1).await;
        // 仍在线：电平不触发
        assert!(h.queue.on_connectivity(true).await.unwrap().is_none());
        assert_eq!(h.queue.pending_count().await.unwrap(), 1);

        h.observer.set_online(false);
        assert!(h.queue.on_connectivity(false).await.unwrap().is_none());
        let report = go_online(&h).await.unwrap();
        assert_eq!(report.applied.len(), 1);
    }

    #[tokio::test]
    async fn continue_policy_skips_failed_but_keeps_it() {
        let remote = ScriptedRemote::default();
        remote.fail(2);
        let h = harness_with(remote, DrainPolicy::ContinueOnFailure).await;
        enqueue_n(&h.queue, 3).await;

        let report = go_online(&h).await.unwrap();
        assert_eq!(report.applied, vec![1, 3]);
        assert_eq!(pending_ids(&h.queue).await, vec![2]);
    }

    #[tokio::test]
    async fn unauthorized_halts_even_with_continue_policy() {
        let remote = ScriptedRemote::default();
        remote.unauthorized.store(true, Ordering::SeqCst);
        let h = harness_with(remote, DrainPolicy::ContinueOnFailure).await;
        enqueue_n(&h.queue, 3).await;

        let report = go_online(&h).await.unwrap();
        assert!(report.hit_unauthorized());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.remaining, 3);
    }

    #[tokio::test]
    async fn enqueue_during_drain_is_processed_after_lower_ids() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let remote = ScriptedRemote {
            gate: Some((entered.clone(), release.clone())),
            ..ScriptedRemote::default()
        };
        let h = harness_with(remote, DrainPolicy::StopOnFirstFailure).await;
        enqueue_n(&h.queue, 2).await;
        h.observer.set_online(true);

        let drain = tokio::spawn({
            let queue = h.queue.clone();
            async move { queue.on_connectivity(true).await }
        });

        entered.notified().await;
        assert_eq!(h.queue.state(), QueueState::Draining);
        // drain 期间的重复触发被忽略
        let again = h.queue.drain().await.unwrap();
        assert_eq!(again.skipped, Some(SkipReason::AlreadyDraining));

        let late = h
            .queue
            .enqueue(Mutation::DeleteRecord {
                entity: EntityKind::Lead,
                id: "l-1".into(),
            })
            .await
            .unwrap();
        release.notify_one();

        let report = drain.await.unwrap().unwrap().unwrap();
        assert_eq!(report.applied, vec![1, 2, late.id]);
        assert_eq!(h.remote.received(), vec![1, 2, late.id]);
        assert_eq!(h.queue.state(), QueueState::Idle);
    }
}
