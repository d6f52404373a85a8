//! Cooperative cancellation for a run.

use std::time::Duration;

use tokio::sync::watch;

/// Trips the paired [`CancelSignal`]s.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Observed by the orchestrator between units of work and during every wait.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

impl CancelSignal {
    /// A signal that can never fire.
    pub fn never() -> Self {
        let (_, signal) = cancel_pair();
        signal
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; pends forever if the handle is gone.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Sleep for `duration` unless cancelled first. Returns `false` when interrupted.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancelled() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sleep_completes_without_cancellation() {
        let signal = CancelSignal::never();
        let start = tokio::time::Instant::now();
        assert!(signal.sleep(Duration::from_secs(3)).await);
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_sleep() {
        let (handle, signal) = cancel_pair();
        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.sleep(Duration::from_secs(60)).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.cancel();
        assert!(!waiter.await.unwrap());
        assert!(signal.is_cancelled());
        assert!(!signal.sleep(Duration::from_secs(1)).await);
    }
}
