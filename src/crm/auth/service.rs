//! 会话管理服务层
//!
//! 负责凭据交换、会话持久化与恢复，并向调用方暴露当前用户。
//!
//! 内存会话与持久化会话在所有可观察时刻保持一致：写入在 `write_lock`
//! 内先落盘再更新内存；`logout` 会递增会话代数，使进行中的登录结果作废。

use crate::crm::auth::api::AuthTransport;
use crate::crm::auth::dao::SessionDao;
use crate::crm::auth::listener::{EmptySessionListener, SessionListener};
use crate::crm::auth::models::{LoginRequest, RegisterRequest, Session, StoredSession, User};
use crate::crm::error::{CrmError, CrmResult};
use sqlx::{Pool, Sqlite};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// 会话管理器
pub struct AuthSessionManager {
    transport: Arc<dyn AuthTransport>,
    dao: SessionDao,
    current: RwLock<Option<Session>>,
    /// 会话代数：每次 logout/invalidate 递增
    write_lock: Mutex<u64>,
    /// 上次登出时删除本地记录失败，记录仍待清除
    clear_pending: AtomicBool,
    listener: Arc<dyn SessionListener>,
}

impl AuthSessionManager {
    /// 创建会话管理器（使用默认空监听器）
    pub fn new(transport: Arc<dyn AuthTransport>, db: Pool<Sqlite>) -> Self {
        Self::with_listener(transport, db, Arc::new(EmptySessionListener))
    }

    /// 创建会话管理器（带自定义监听器）
    pub fn with_listener(
        transport: Arc<dyn AuthTransport>,
        db: Pool<Sqlite>,
        listener: Arc<dyn SessionListener>,
    ) -> Self {
        Self {
            transport,
            dao: SessionDao::new(db),
            current: RwLock::new(None),
            write_lock: Mutex::new(0),
            clear_pending: AtomicBool::new(false),
            listener,
        }
    }

    /// 登录：成功后持久化 token 与用户并更新内存状态
    pub async fn login(&self, email: &str, password: &str) -> CrmResult<Session> {
        let generation = *self.write_lock.lock().await;
        info!("[Auth] 🔐 正在登录: {}", email);

        let resp = self
            .transport
            .login(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .await
            .map_err(|e| {
                warn!("[Auth] 登录失败: {}", e);
                e
            })?;

        self.commit(generation, resp.into()).await
    }

    /// 注册新用户，成功后与登录一样建立会话
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
        role: Option<&str>,
    ) -> CrmResult<Session> {
        let generation = *self.write_lock.lock().await;
        info!("[Auth] 📝 正在注册: {}", email);

        let resp = self
            .transport
            .register(&RegisterRequest {
                email: email.to_string(),
                password: password.to_string(),
                name: name.to_string(),
                role: role.map(str::to_string),
            })
            .await
            .map_err(|e| {
                warn!("[Auth] 注册失败: {}", e);
                e
            })?;

        self.commit(generation, resp.into()).await
    }

    /// 原子地落盘并切换内存会话；期间若发生过 logout 则丢弃结果
    async fn commit(&self, generation: u64, session: Session) -> CrmResult<Session> {
        let guard = self.write_lock.lock().await;
        if *guard != generation {
            warn!(
                "[Auth] 登录期间会话已被清除，丢弃结果 (代数 {} -> {})",
                generation, *guard
            );
            return Err(CrmError::SessionCleared);
        }

        let stored = StoredSession::from_session(&session)
            .map_err(|e| CrmError::Storage(format!("序列化用户失败: {}", e)))?;
        self.dao.save(&stored).await.map_err(CrmError::storage)?;
        self.clear_pending.store(false, Ordering::Release);
        self.set_current(Some(session.clone()));
        drop(guard);

        info!(
            "[Auth] ✅ 会话已建立，用户ID: {}, 角色: {}",
            session.user.id, session.user.role
        );
        self.listener
            .on_session_changed(Some(session.user.clone()))
            .await;
        Ok(session)
    }

    /// 启动时恢复会话；记录损坏时清除并返回 None，从不向调用方报错
    pub async fn restore(&self) -> Option<Session> {
        let guard = self.write_lock.lock().await;

        // 已登出但记录未删掉：不恢复，先补删
        if self.clear_pending.load(Ordering::Acquire) {
            warn!("[Auth] 上次登出未能清除本地会话，重试清除");
            match self.dao.clear().await {
                Ok(()) => self.clear_pending.store(false, Ordering::Release),
                Err(e) => error!("[Auth] 重试清除本地会话失败: {:#}", e),
            }
            self.set_current(None);
            return None;
        }

        let stored = match self.dao.load().await {
            Ok(stored) => stored,
            Err(e) => {
                error!("[Auth] 读取本地会话失败，按无会话处理: {:#}", e);
                self.set_current(None);
                return None;
            }
        };

        let restored = match stored.map(StoredSession::into_session) {
            None => {
                debug!("[Auth] 本地没有已保存的会话");
                None
            }
            Some(Ok(session)) => Some(session),
            Some(Err(reason)) => {
                warn!("[Auth] ⚠️ 本地会话已损坏（{}），清除记录", reason);
                if let Err(e) = self.dao.clear().await {
                    error!("[Auth] 清除损坏会话失败: {:#}", e);
                }
                None
            }
        };

        self.set_current(restored.clone());
        drop(guard);

        if let Some(session) = &restored {
            info!("[Auth] ♻️ 会话已恢复，用户ID: {}", session.user.id);
            self.listener
                .on_session_changed(Some(session.user.clone()))
                .await;
        }
        restored
    }

    /// 登出：无条件清除持久化与内存会话，可重复调用
    pub async fn logout(&self) -> CrmResult<()> {
        let had_session = self.clear_session().await?;
        if had_session {
            info!("[Auth] 👋 已登出");
            self.listener.on_session_changed(None).await;
        } else {
            debug!("[Auth] 当前无会话，登出为空操作");
        }
        Ok(())
    }

    /// 远端返回 401/403 时调用：清除会话并通知监听器
    pub async fn invalidate(&self) -> CrmResult<()> {
        let had_session = self.clear_session().await?;
        if had_session {
            warn!("[Auth] ⚠️ token 已失效，会话被清除");
            self.listener.on_session_expired().await;
            self.listener.on_session_changed(None).await;
        }
        Ok(())
    }

    /// 清除会话，返回清除前是否存在内存会话
    async fn clear_session(&self) -> CrmResult<bool> {
        let mut guard = self.write_lock.lock().await;
        *guard += 1;
        let had_session = self.current_session().is_some();
        // 内存状态无论落盘是否成功都要清掉；删除失败时留待 restore/logout 重试
        self.set_current(None);
        if let Err(e) = self.dao.clear().await {
            error!("[Auth] ❌ 清除本地会话失败: {:#}", e);
            self.clear_pending.store(true, Ordering::Release);
            return Err(CrmError::storage(e));
        }
        self.clear_pending.store(false, Ordering::Release);
        Ok(had_session)
    }

    /// 当前用户
    pub fn current_user(&self) -> Option<User> {
        self.read_current(|s| s.map(|s| s.user.clone()))
    }

    /// 当前会话（token + 用户）
    pub fn current_session(&self) -> Option<Session> {
        self.read_current(|s| s.cloned())
    }

    /// 当前 token
    pub fn token(&self) -> Option<String> {
        self.read_current(|s| s.map(|s| s.token.clone()))
    }

    pub fn is_authenticated(&self) -> bool {
        self.read_current(|s| s.is_some())
    }

    fn read_current<T>(&self, f: impl FnOnce(Option<&Session>) -> T) -> T {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        f(guard.as_ref())
    }

    fn set_current(&self, session: Option<Session>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = session;
    }
}
