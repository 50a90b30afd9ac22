use tokio::sync::watch;

/// Create a connected trigger/signal pair for cooperative shutdown.
///
/// Cloned signals all resolve once the trigger fires. Dropping the
/// trigger without firing counts as a shutdown too, so a crashed owner
/// can never leave the stages running forever.
pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);

    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Signal shutdown to every connected [`ShutdownSignal`]. Idempotent.
    pub fn fire(&self) {
        let _ = self.tx.send(true);
    }
}

#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolves once shutdown has been triggered.
    ///
    /// Cancel safe, so it can be used as a `tokio::select!` branch.
    pub async fn recv(&mut self) {
        // Err means the trigger is gone, which is shutdown as well.
        let _ = self.rx.wait_for(|fired| *fired).await;
    }

    pub fn is_fired(&self) -> bool {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fire_resolves_all_clones() {
        let (trigger, mut first) = channel();
        let mut second = first.clone();

        assert!(!first.is_fired());

        trigger.fire();
        trigger.fire();

        first.recv().await;
        second.recv().await;
        assert!(second.is_fired());
    }

    #[tokio::test]
    async fn dropped_trigger_counts_as_fired() {
        let (trigger, mut signal) = channel();
        drop(trigger);

        signal.recv().await;
    }
}
