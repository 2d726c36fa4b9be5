//! 离线同步模块
//!
//! 断网时缓存写操作，恢复连接后按入队顺序重放

pub mod api;
pub mod connectivity;
pub mod dao;
pub mod listener;
pub mod models;
pub mod service;

// 重新导出主要类型和函数
pub use api::{RemoteApplier, SyncApi, TokenSource};
pub use connectivity::{
    connectivity_edge, ConnectivityEdge, ConnectivityObserver, ConnectivitySignal,
};
pub use dao::PendingChangeDao;
pub use listener::{EmptySyncListener, SyncListener};
pub use models::{
    ClientDraft, DrainPolicy, DrainReport, EntityKind, LeadDraft, Mutation, OfflineQueueConfig,
    PendingChange, ProjectDraft, ProjectStatus, QueueState, SkipReason,
};
pub use service::OfflineMutationQueue;
