//! 认证模块模型定义

use crate::crm::types::deserialize_id;
use serde::{Deserialize, Serialize};

/// 当前登录用户
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: String,
}

/// 客户端会话（token 与用户信息总是成对出现）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub user: User,
}

/// 登录请求体
#[derive(Debug, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// 注册请求体
#[derive(Debug, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// 登录/注册成功响应
#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub user: User,
}

impl From<AuthResponse> for Session {
    fn from(resp: AuthResponse) -> Self {
        Self {
            token: resp.access_token,
            user: resp.user,
        }
    }
}

/// 本地持久化的原始会话记录（user 以 JSON 文本存储）
#[derive(Debug, Clone)]
pub struct StoredSession {
    pub token: String,
    pub user_json: String,
}

impl StoredSession {
    pub fn from_session(session: &Session) -> serde_json::Result<Self> {
        Ok(Self {
            token: session.token.clone(),
            user_json: serde_json::to_string(&session.user)?,
        })
    }

    /// 解析为会话；token 为空、JSON 损坏或缺字段都视为无效
    pub fn into_session(self) -> Result<Session, String> {
        if self.token.trim().is_empty() {
            return Err("token 为空".to_string());
        }
        let user: User = serde_json::from_str(&self.user_json)
            .map_err(|e| format!("user 解析失败: {}", e))?;
        Ok(Session {
            token: self.token,
            user,
        })
    }
}
