use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

/// Signals that the benchmark run was interrupted, usually by Ctrl-C.
///
/// The matrix loop checks [InterruptHandle::is_interrupted] before starting each scenario, and
/// waits on an in-flight scenario race [InterruptListener::wait_for_interrupt] so that they give
/// up early. An interrupted scenario is still recorded and torn down.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    interrupted: Arc<AtomicBool>,
    sender: Arc<watch::Sender<bool>>,
}

impl Default for InterruptHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self {
            interrupted: Arc::new(AtomicBool::new(false)),
            sender: Arc::new(watch::channel(false).0),
        }
    }

    pub fn interrupt(&self) {
        if self.interrupted.swap(true, Ordering::SeqCst) {
            return;
        }
        // Nobody listening just means nothing is waiting right now, the flag still holds.
        if self.sender.send(true).is_err() {
            log::trace!("Interrupt raised with no active listeners");
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub fn new_listener(&self) -> InterruptListener {
        InterruptListener {
            receiver: self.sender.subscribe(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InterruptListener {
    receiver: watch::Receiver<bool>,
}

impl InterruptListener {
    /// Resolves once the run has been interrupted, immediately if that already happened.
    ///
    /// Never resolves if the handle is dropped without interrupting, so it is safe to race against
    /// other work.
    pub async fn wait_for_interrupt(&mut self) {
        if self.receiver.wait_for(|interrupted| *interrupted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[derive(derive_more::Error, derive_more::Display, Debug)]
pub struct InterruptedError {
    msg: String,
}

impl Default for InterruptedError {
    fn default() -> Self {
        Self {
            msg: "Execution cancelled by interrupt".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn listener_sees_interrupt_raised_before_waiting() {
        let handle = InterruptHandle::new();
        let mut listener = handle.new_listener();
        handle.interrupt();

        tokio::time::timeout(Duration::from_secs(1), listener.wait_for_interrupt())
            .await
            .expect("listener should resolve after interrupt");
        assert!(handle.is_interrupted());
    }

    #[tokio::test]
    async fn listener_waits_without_interrupt() {
        let handle = InterruptHandle::new();
        let mut listener = handle.new_listener();

        let waited =
            tokio::time::timeout(Duration::from_millis(50), listener.wait_for_interrupt()).await;
        assert!(waited.is_err());
        assert!(!handle.is_interrupted());
    }
}
