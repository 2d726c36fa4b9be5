//! CRM 客户端上下文
//!
//! 显式构造、注入给调用方的上下文对象，持有数据库连接池、会话管理器、
//! 离线队列与连通性信号；生命周期与应用的启动/停止绑定。

use crate::crm::auth::{
    AuthApi, AuthSessionManager, EmptySessionListener, SessionListener,
};
use crate::crm::db::create_sqlite_pool_with_migration;
use crate::crm::error::CrmResult;
use crate::crm::sync::{
    ConnectivitySignal, DrainPolicy, DrainReport, EmptySyncListener, Mutation,
    OfflineMutationQueue, OfflineQueueConfig, SyncApi, SyncListener,
};
use anyhow::{Context, Result};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// 客户端配置
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// HTTP API 基础地址
    pub api_base_url: String,
    /// 本地 SQLite 数据库 URL
    ///
    /// 例如：`sqlite://crm_client.db?mode=rwc`
    pub db_url: String,
    /// 单个 HTTP 请求超时
    pub request_timeout: Duration,
    /// 离线队列失败处理策略
    pub drain_policy: DrainPolicy,
}

impl ClientConfig {
    /// 创建默认配置
    pub fn new(api_base_url: String) -> Self {
        Self {
            api_base_url,
            db_url: "sqlite://crm_client.db?mode=rwc".to_string(),
            request_timeout: Duration::from_secs(15),
            drain_policy: DrainPolicy::default(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("http://localhost:3001".to_string())
    }
}

/// 提交变更的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// 已同步到远端
    Applied(i64),
    /// 已写入离线队列，等待下一次 drain
    Queued(i64),
}

/// CRM 客户端
pub struct CrmClient {
    config: ClientConfig,
    session: Arc<AuthSessionManager>,
    queue: Arc<OfflineMutationQueue>,
    connectivity: ConnectivitySignal,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl CrmClient {
    /// 创建客户端：打开数据库、构建 HTTP 传输并恢复本地会话
    pub async fn new(config: ClientConfig, connectivity: ConnectivitySignal) -> Result<Self> {
        Self::with_listeners(
            config,
            connectivity,
            Arc::new(EmptySessionListener),
            Arc::new(EmptySyncListener),
        )
        .await
    }

    /// 创建客户端（带自定义监听器）
    pub async fn with_listeners(
        config: ClientConfig,
        connectivity: ConnectivitySignal,
        session_listener: Arc<dyn SessionListener>,
        sync_listener: Arc<dyn SyncListener>,
    ) -> Result<Self> {
        info!(
            "[Client] 创建客户端，API: {}, SQLite数据库: {}",
            config.api_base_url, config.db_url
        );
        let pool = create_sqlite_pool_with_migration(&config.db_url).await?;

        let http_client = reqwest::ClientBuilder::new()
            .timeout(config.request_timeout)
            .build()
            .context("创建 HTTP 客户端失败")?;

        let session = Arc::new(AuthSessionManager::with_listener(
            Arc::new(AuthApi::new(
                http_client.clone(),
                config.api_base_url.clone(),
            )),
            pool.clone(),
            session_listener,
        ));
        let applier = Arc::new(SyncApi::new(
            http_client,
            config.api_base_url.clone(),
            session.clone(),
        ));
        let queue = Arc::new(OfflineMutationQueue::with_listener(
            OfflineQueueConfig {
                drain_policy: config.drain_policy,
            },
            pool,
            applier,
            connectivity.clone(),
            sync_listener,
        ));

        let client = Self::from_parts(config, session, queue, connectivity);
        client.session.restore().await;
        Ok(client)
    }

    /// 由已构建的组件组装客户端
    pub fn from_parts(
        config: ClientConfig,
        session: Arc<AuthSessionManager>,
        queue: Arc<OfflineMutationQueue>,
        connectivity: ConnectivitySignal,
    ) -> Self {
        Self {
            config,
            session,
            queue,
            connectivity,
            watcher: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<AuthSessionManager> {
        &self.session
    }

    pub fn queue(&self) -> &Arc<OfflineMutationQueue> {
        &self.queue
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// 提交一个写操作
    ///
    /// 变更总是先入队再同步：在线时立即 drain，已有积压时排在积压之后，
    /// 离线时留在队列中等待恢复连接。
    pub async fn submit(&self, mutation: Mutation) -> CrmResult<SubmitOutcome> {
        let change = self.queue.enqueue(mutation).await?;
        if !self.is_online() {
            return Ok(SubmitOutcome::Queued(change.id));
        }

        let report = self.drain().await?;
        if report.applied.contains(&change.id) {
            Ok(SubmitOutcome::Applied(change.id))
        } else {
            Ok(SubmitOutcome::Queued(change.id))
        }
    }

    /// 手动触发一次 drain
    pub async fn drain(&self) -> CrmResult<DrainReport> {
        let report = self.queue.drain().await?;
        expire_session_if_rejected(&self.session, &report).await;
        Ok(report)
    }

    /// 启动连通性监听任务：每次状态变化都交给离线队列做跳变检测
    pub fn start(&self) {
        let mut slot = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            warn!("[Client] 连通性监听已启动，忽略重复调用");
            return;
        }

        let queue = self.queue.clone();
        let session = self.session.clone();
        let mut signal = self.connectivity.clone();
        *slot = Some(tokio::spawn(async move {
            let mut online = signal.current();
            loop {
                match queue.on_connectivity(online).await {
                    Ok(Some(report)) => expire_session_if_rejected(&session, &report).await,
                    Ok(None) => {}
                    Err(e) => error!("[Client] ❌ 重放离线变更失败: {}", e),
                }
                match signal.changed().await {
                    Some(next) => online = next,
                    None => {
                        info!("[Client] 网络观察者已关闭，停止连通性监听");
                        break;
                    }
                }
            }
        }));
        info!("[Client] ✅ 连通性监听已启动");
    }

    /// 停止后台任务
    pub async fn shutdown(&self) {
        let handle = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
            info!("[Client] 👋 客户端已停止");
        }
    }
}

/// drain 因 401/403 中止时清除会话
async fn expire_session_if_rejected(session: &AuthSessionManager, report: &DrainReport) {
    if report.hit_unauthorized() {
        if let Err(e) = session.invalidate().await {
            error!("[Client] 清除失效会话失败: {}", e);
        }
    }
}
