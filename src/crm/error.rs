//! 客户端核心错误类型
//!
//! 对外暴露的错误分类：登录/注册错误交给 UI 展示，drain 错误只记录日志，
//! 队列保持非空等待下一次触发。

/// CRM 客户端错误
#[derive(Debug, thiserror::Error)]
pub enum CrmError {
    /// 凭据无效（用户可修正，界面内联提示）
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// 网络/传输错误（临时性，重新调用同一操作即可重试）
    #[error("network error: {0}")]
    Network(String),

    /// 本地持久化失败（当前操作失败，不影响进程）
    #[error("storage error: {0}")]
    Storage(String),

    /// 远端应用变更失败（中止本次 drain，下次触发时重试）
    #[error("remote apply failed for change {id}: {reason}")]
    RemoteApply { id: i64, reason: String },

    /// 远端返回 401/403，token 无效或已过期
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// 登录进行期间会话被清除（logout 优先），结果被丢弃
    #[error("session was cleared while the request was in flight")]
    SessionCleared,
}

impl CrmError {
    /// 将 DAO 层的 anyhow 错误归类为存储错误（保留完整上下文链）
    pub fn storage(err: anyhow::Error) -> Self {
        Self::Storage(format!("{:#}", err))
    }

    /// 是否为可重试的临时错误
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RemoteApply { .. })
    }
}

impl From<reqwest::Error> for CrmError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

pub type CrmResult<T> = std::result::Result<T, CrmError>;
