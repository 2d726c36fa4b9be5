//! 会话监听器回调接口

use crate::crm::auth::models::User;
use async_trait::async_trait;

/// 会话监听器回调接口
#[async_trait]
pub trait SessionListener: Send + Sync {
    /// 会话变更（登录、注册、恢复为 Some，登出为 None）
    async fn on_session_changed(&self, user: Option<User>);

    /// 远端返回 401/403，会话已被清除
    async fn on_session_expired(&self);
}

/// 默认空实现（无操作）
pub struct EmptySessionListener;

#[async_trait]
impl SessionListener for EmptySessionListener {
    async fn on_session_changed(&self, _user: Option<User>) {}
    async fn on_session_expired(&self) {}
}
