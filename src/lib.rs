pub mod crm;

// 重新导出常用类型和函数，方便外部使用
pub use crm::{
    auth::{AuthSessionManager, Session, User},
    client::{ClientConfig, CrmClient, SubmitOutcome},
    error::{CrmError, CrmResult},
    sync::{
        ConnectivityObserver, ConnectivitySignal, DrainPolicy, DrainReport, Mutation,
        OfflineMutationQueue, PendingChange,
    },
};
