//! 同步 HTTP API 客户端
//!
//! 负责把单条待同步变更提交到 `POST /sync`

use crate::crm::auth::AuthSessionManager;
use crate::crm::error::{CrmError, CrmResult};
use crate::crm::sync::models::{PendingChange, SyncPayload};
use crate::crm::types::{new_operation_id, read_http_response, HttpReply};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Arc;
use tracing::{debug, info};

/// 远端应用接口：任何非成功结果都会中止 drain
#[async_trait]
pub trait RemoteApplier: Send + Sync {
    async fn apply(&self, change: &PendingChange) -> CrmResult<()>;
}

/// 请求时提供 token
pub trait TokenSource: Send + Sync {
    fn token(&self) -> Option<String>;
}

impl TokenSource for AuthSessionManager {
    fn token(&self) -> Option<String> {
        AuthSessionManager::token(self)
    }
}

/// 基于 reqwest 的同步 API
pub struct SyncApi {
    client: reqwest::Client,
    api_base_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl SyncApi {
    pub fn new(client: reqwest::Client, api_base_url: String, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            client,
            api_base_url,
            tokens,
        }
    }
}

#[async_trait]
impl RemoteApplier for SyncApi {
    async fn apply(&self, change: &PendingChange) -> CrmResult<()> {
        let token = self
            .tokens
            .token()
            .ok_or_else(|| CrmError::Unauthorized("当前没有登录会话".to_string()))?;

        let payload = SyncPayload::from_change(change).map_err(|e| CrmError::RemoteApply {
            id: change.id,
            reason: format!("序列化变更失败: {}", e),
        })?;

        let operation_id = new_operation_id();
        let url = format!("{}/sync", self.api_base_url.trim_end_matches('/'));
        info!(
            "[SyncAPI] 📡 提交变更 id={}, type={}",
            change.id, payload.kind
        );
        debug!("[SyncAPI]   请求URL: {}, 操作ID: {}", url, operation_id);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| CrmError::RemoteApply {
                id: change.id,
                reason: format!("请求失败: {}", e),
            })?;

        let reply = read_http_response(response, "同步变更")
            .await
            .map_err(|e| CrmError::RemoteApply {
                id: change.id,
                reason: format!("读取响应失败: {}", e),
            })?;
        classify_sync_reply(change.id, reply)
    }
}

/// 2xx 成功；401/403 为 token 失效；其余一律为应用失败
pub(crate) fn classify_sync_reply(id: i64, reply: HttpReply) -> CrmResult<()> {
    match reply.status {
        status if status.is_success() => Ok(()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(CrmError::Unauthorized(reply.error_message()))
        }
        status => Err(CrmError::RemoteApply {
            id,
            reason: format!("HTTP 错误 {}: {}", status, reply.error_message()),
        }),
    }
}
