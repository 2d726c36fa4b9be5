//! 网络连通性信号
//!
//! 进程内唯一的在线/离线状态：平台网络观察者持有 `ConnectivityObserver` 写入，
//! 其余组件通过 `ConnectivitySignal` 读取或订阅。

use tokio::sync::watch;
use tracing::info;

/// 连通性跳变
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEdge {
    CameOnline,
    WentOffline,
    Unchanged,
}

/// 由（上一次状态，当前状态）推导跳变
pub fn connectivity_edge(previous: bool, current: bool) -> ConnectivityEdge {
    match (previous, current) {
        (false, true) => ConnectivityEdge::CameOnline,
        (true, false) => ConnectivityEdge::WentOffline,
        _ => ConnectivityEdge::Unchanged,
    }
}

/// 连通性写入端（仅平台网络观察者持有）
pub struct ConnectivityObserver {
    tx: watch::Sender<bool>,
}

impl ConnectivityObserver {
    /// 创建写入端与读取端
    pub fn new(initially_online: bool) -> (Self, ConnectivitySignal) {
        let (tx, rx) = watch::channel(initially_online);
        (Self { tx }, ConnectivitySignal { rx })
    }

    /// 上报当前网络状态（重复上报同一状态不会唤醒订阅方）
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            if online {
                info!("[Network] 🌐 网络已连接");
            } else {
                info!("[Network] 📴 网络已断开");
            }
        }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// 额外的读取端
    pub fn subscribe(&self) -> ConnectivitySignal {
        ConnectivitySignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// 连通性读取端
#[derive(Clone)]
pub struct ConnectivitySignal {
    rx: watch::Receiver<bool>,
}

impl ConnectivitySignal {
    pub fn is_online(&self) -> bool {
        *self.rx.borrow()
    }

    /// 读取当前值并标记为已读
    pub fn current(&mut self) -> bool {
        *self.rx.borrow_and_update()
    }

    /// 等待下一次状态变化；写入端被丢弃后返回 None
    pub async fn changed(&mut self) -> Option<bool> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}
