//! 사용자에게 보여줄 상태 문구

use std::sync::Arc;
use tokio::sync::watch;

/// 마지막 상태 문구를 공유하는 핸들. 복제해서 여러 컴포넌트가 갱신한다
#[derive(Clone)]
pub struct StatusLine {
    tx: Arc<watch::Sender<String>>,
}

impl StatusLine {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(String::new());
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, status: impl Into<String>) {
        let status = status.into();
        tracing::info!(status = %status, "Status changed");
        self.tx.send_replace(status);
    }

    pub fn current(&self) -> String {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Default for StatusLine {
    fn default() -> Self {
        Self::new()
    }
}
