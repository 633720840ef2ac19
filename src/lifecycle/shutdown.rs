use std::sync::Arc;

use tokio::sync::watch;

/// Process-wide quit broadcast. Triggering it is fire-and-forget: every loop
/// holding a [`QuitReceiver`] exits at its next await point and nobody waits
/// for acknowledgements.
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> QuitReceiver {
        QuitReceiver {
            rx: self.tx.subscribe(),
        }
    }

    pub fn trigger(&self) {
        if !self.tx.send_replace(true) {
            tracing::warn!("Quit signal broadcast");
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct QuitReceiver {
    rx: watch::Receiver<bool>,
}

impl QuitReceiver {
    /// Resolves once quit has been triggered (immediately if it already was).
    pub async fn recv(&mut self) {
        // An error means every sender is gone, which is as final as a quit.
        let _ = self.rx.wait_for(|quit| *quit).await;
    }
}
