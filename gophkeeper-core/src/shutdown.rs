//! Hierarchical cancellation signal.
//!
//! A [`ShutdownTrigger`] owns one flag; [`ShutdownTrigger::child`] creates a
//! trigger whose listeners also observe every ancestor. Cancelling the root
//! therefore stops every task, while cancelling a child stops only that
//! task.

use crate::{KeeperError, Result};
use std::future::Future;
use tokio::sync::watch;

/// Owner side of a cancellation flag.
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
    ancestors: Vec<watch::Receiver<bool>>,
}

impl ShutdownTrigger {
    /// Create a root trigger.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            tx,
            ancestors: Vec::new(),
        }
    }

    fn receivers(&self) -> Vec<watch::Receiver<bool>> {
        let mut receivers = self.ancestors.clone();
        receivers.push(self.tx.subscribe());
        receivers
    }

    /// A listener for this trigger and its ancestors.
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            receivers: self.receivers(),
        }
    }

    /// A trigger that is also cancelled when this one is.
    pub fn child(&self) -> ShutdownTrigger {
        let (tx, _) = watch::channel(false);
        ShutdownTrigger {
            tx,
            ancestors: self.receivers(),
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow() || self.ancestors.iter().any(|rx| *rx.borrow())
    }
}

impl Default for ShutdownTrigger {
    fn default() -> Self {
        Self::new()
    }
}

/// Listener side of a cancellation flag.
#[derive(Clone)]
pub struct Shutdown {
    receivers: Vec<watch::Receiver<bool>>,
}

impl Shutdown {
    /// A listener that is never cancelled.
    pub fn never() -> Self {
        ShutdownTrigger::new().subscribe()
    }

    pub fn is_cancelled(&self) -> bool {
        self.receivers.iter().any(|rx| *rx.borrow())
    }

    /// Resolve once this listener or any ancestor is cancelled.
    ///
    /// A trigger dropped without cancelling never resolves its branch.
    pub async fn cancelled(&mut self) {
        if self.is_cancelled() {
            return;
        }
        let waits = self.receivers.iter_mut().map(|rx| {
            Box::pin(async move {
                let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
                if closed {
                    std::future::pending::<()>().await;
                }
            })
        });
        futures::future::select_all(waits).await;
    }

    /// Run `fut` unless cancelled first; cancellation wins ties.
    pub async fn guard<F: Future>(&mut self, fut: F) -> Result<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(KeeperError::Cancelled),
            output = fut => Ok(output),
        }
    }
}
