use std::sync::Arc;

use tokio::sync::watch;

/// Broadcast used to ask background tasks (flushers, writer workers, the
/// retention sweep) to wind down. Receivers observe the signal at their next
/// yield point; flushers perform one final flush before returning.
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn signal(&self) {
        let _ = self.tx.send(true);
    }

    pub fn has_shut_down(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> ShutdownReceiver {
        ShutdownReceiver {
            rx: self.tx.subscribe(),
        }
    }
}

#[derive(Clone)]
pub struct ShutdownReceiver {
    rx: watch::Receiver<bool>,
}

impl ShutdownReceiver {
    /// Resolves once shutdown is signalled (immediately if it already was).
    pub async fn wait_for_shutdown(&mut self) {
        // An Err means the sender is gone, which we treat as shutdown.
        let _ = self.rx.wait_for(|shutting_down| *shutting_down).await;
    }

    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }
}
