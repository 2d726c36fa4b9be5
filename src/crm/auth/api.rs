//! 认证 HTTP API 客户端
//!
//! 负责 `/auth/login` 与 `/auth/register` 请求

use crate::crm::auth::models::{AuthResponse, LoginRequest, RegisterRequest};
use crate::crm::error::{CrmError, CrmResult};
use crate::crm::types::{new_operation_id, read_http_response, HttpReply};
use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, error, info};

/// 认证传输接口（便于在测试中替换远端）
#[async_trait]
pub trait AuthTransport: Send + Sync {
    /// 用邮箱和密码换取 token
    async fn login(&self, req: &LoginRequest) -> CrmResult<AuthResponse>;

    /// 注册新用户并直接登录
    async fn register(&self, req: &RegisterRequest) -> CrmResult<AuthResponse>;
}

/// 基于 reqwest 的认证 API
pub struct AuthApi {
    client: reqwest::Client,
    api_base_url: String,
}

impl AuthApi {
    /// 创建新的认证 API 客户端
    pub fn new(client: reqwest::Client, api_base_url: String) -> Self {
        Self {
            client,
            api_base_url,
        }
    }

    async fn post_auth<B: serde::Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
        operation_name: &str,
    ) -> CrmResult<AuthResponse> {
        let operation_id = new_operation_id();
        let url = format!("{}{}", self.api_base_url.trim_end_matches('/'), path);

        info!("[AuthAPI] 🔐 {}...", operation_name);
        debug!("[AuthAPI]   请求URL: {}, 操作ID: {}", url, operation_id);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!("[AuthAPI] {}请求失败: {}", operation_name, e);
                CrmError::Network(format!("请求失败: {}", e))
            })?;

        let reply = read_http_response(response, operation_name).await?;
        classify_auth_reply(reply)
    }
}

#[async_trait]
impl AuthTransport for AuthApi {
    async fn login(&self, req: &LoginRequest) -> CrmResult<AuthResponse> {
        self.post_auth("/auth/login", req, "登录").await
    }

    async fn register(&self, req: &RegisterRequest) -> CrmResult<AuthResponse> {
        self.post_auth("/auth/register", req, "注册").await
    }
}

/// 将认证响应归类：凭据类 4xx 为 InvalidCredentials，其余失败视为临时网络错误
pub(crate) fn classify_auth_reply(reply: HttpReply) -> CrmResult<AuthResponse> {
    if reply.is_success() {
        return serde_json::from_slice::<AuthResponse>(&reply.body).map_err(|e| {
            error!("[AuthAPI] 认证响应反序列化失败: {:?}", e);
            CrmError::Network(format!("反序列化响应失败: {}", e))
        });
    }

    let message = reply.error_message();
    match reply.status {
        StatusCode::BAD_REQUEST
        | StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::NOT_FOUND
        | StatusCode::CONFLICT
        | StatusCode::UNPROCESSABLE_ENTITY => Err(CrmError::InvalidCredentials(message)),
        status => Err(CrmError::Network(format!("HTTP 错误 {}: {}", status, message))),
    }
}
