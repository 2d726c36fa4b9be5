//! 认证会话模块
//!
//! 登录/注册换取 token，持久化会话并在启动时恢复

pub mod api;
pub mod dao;
pub mod listener;
pub mod models;
pub mod service;

// 重新导出主要类型
pub use api::{AuthApi, AuthTransport};
pub use dao::SessionDao;
pub use listener::{EmptySessionListener, SessionListener};
pub use models::{Session, User};
pub use service::AuthSessionManager;
