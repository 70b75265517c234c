//! Cooperative shutdown signal.
//!
//! A `ShutdownTrigger` fans out to any number of `Shutdown` listeners.
//! Blocking acceptor threads poll `is_triggered()` between readiness waits;
//! async echo sessions await `triggered()` alongside their reads.

use tokio::sync::watch;

/// Sending half. Dropping it counts as a shutdown.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Receiving half, cheap to clone into every loop and session.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Create a connected trigger/listener pair.
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    /// Signal every listener. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Shutdown {
    /// Non-blocking check, used from acceptor threads.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolve once the trigger fires or is dropped.
    pub async fn triggered(&mut self) {
        // Err means the trigger is gone, which is a shutdown too
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_trigger_sets_flag() {
        let (trigger, shutdown) = channel();
        let other = shutdown.clone();

        assert!(!shutdown.is_triggered());
        trigger.trigger();
        assert!(shutdown.is_triggered());
        assert!(other.is_triggered());

        // Second trigger is harmless
        trigger.trigger();
        assert!(shutdown.is_triggered());
    }

    #[test]
    fn test_dropped_trigger_counts_as_shutdown() {
        let (trigger, shutdown) = channel();
        drop(trigger);
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_triggered_wakes_waiter() {
        let (trigger, shutdown) = channel();
        let mut waiter = shutdown.clone();

        let task = tokio::spawn(async move { waiter.triggered().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        trigger.trigger();
        let joined =
            tokio_test::assert_ok!(tokio::time::timeout(Duration::from_secs(1), task).await);
        tokio_test::assert_ok!(joined);
    }

    #[tokio::test]
    async fn test_triggered_returns_immediately_when_already_fired() {
        let (trigger, mut shutdown) = channel();
        trigger.trigger();
        tokio_test::assert_ok!(
            tokio::time::timeout(Duration::from_millis(100), shutdown.triggered()).await
        );
    }
}
