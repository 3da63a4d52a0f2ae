/// Run-level cancellation signal
///
/// A `RunCanceller` flips a watch channel once; the scheduler stops promoting
/// PENDING steps and running ops can poll the flag through their `OpContext`.

use tokio::sync::watch;

/// Handle used by callers to cancel a run
#[derive(Debug, Clone)]
pub struct RunCanceller {
    sender: std::sync::Arc<watch::Sender<bool>>,
}

impl Default for RunCanceller {
    fn default() -> Self {
        Self::new()
    }
}

impl RunCanceller {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: std::sync::Arc::new(sender),
        }
    }

    /// Request cancellation; repeated calls are no-ops
    pub fn cancel(&self) {
        if !self.sender.send_replace(true) {
            tracing::warn!("🛑 Run cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Flag observed by the scheduler and the ops of the run
    pub fn flag(&self) -> CancellationFlag {
        CancellationFlag {
            receiver: self.sender.subscribe(),
        }
    }
}

/// Read side of a [`RunCanceller`]
#[derive(Debug, Clone)]
pub struct CancellationFlag {
    receiver: watch::Receiver<bool>,
}

impl CancellationFlag {
    /// A flag that is never raised
    pub fn never() -> Self {
        RunCanceller::new().flag()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once cancellation is requested; pends forever if the canceller is dropped first
    pub async fn cancelled(&mut self) {
        if self.receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
