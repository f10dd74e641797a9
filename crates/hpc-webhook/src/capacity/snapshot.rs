use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use super::CapacitySnapshot;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("no capacity snapshot published within {millis}ms")]
    Timeout { millis: u128 },
    #[error("capacity poller stopped before publishing a snapshot")]
    PollerStopped,
}

/// Create the single-slot cell carrying the most recent snapshot.
pub fn snapshot_channel() -> (SnapshotPublisher, SnapshotReader) {
    let (tx, rx) = watch::channel(None);
    (SnapshotPublisher { tx }, SnapshotReader { rx })
}

/// Write side, owned by the poller.
#[derive(Debug)]
pub struct SnapshotPublisher {
    tx: watch::Sender<Option<CapacitySnapshot>>,
}

impl SnapshotPublisher {
    /// Replace the current snapshot. Readers see either the previous or the
    /// new value as a whole.
    pub fn publish(&self, snapshot: CapacitySnapshot) {
        self.tx.send_replace(Some(snapshot));
    }
}

/// Read side, cloned into every request handler.
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    rx: watch::Receiver<Option<CapacitySnapshot>>,
}

impl SnapshotReader {
    /// The last completed scan, if any.
    pub fn latest(&self) -> Option<CapacitySnapshot> {
        *self.rx.borrow()
    }

    /// The last completed scan, waiting at most `timeout` for the first one.
    pub async fn wait_latest(&self, timeout: Duration) -> Result<CapacitySnapshot, SnapshotError> {
        if let Some(snapshot) = self.latest() {
            return Ok(snapshot);
        }

        let mut rx = self.rx.clone();
        let waited = tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await;
        match waited {
            Ok(Ok(snapshot)) => (*snapshot).ok_or(SnapshotError::PollerStopped),
            Ok(Err(_)) => Err(SnapshotError::PollerStopped),
            Err(_) => Err(SnapshotError::Timeout {
                millis: timeout.as_millis(),
            }),
        }
    }
}
