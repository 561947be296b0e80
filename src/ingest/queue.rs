//! Bounded path queue shared by the watcher, the sweeper and the workers.
//!
//! Every queued path is claimed in an in-flight set until a worker finishes
//! with it, so a file is never handled by two workers at once and a burst of
//! events for one file occupies a single queue slot. An event arriving for a
//! claimed path marks it for exactly one more pass.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Producer side of the work queue.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    tx: mpsc::Sender<PathBuf>,
    // path -> re-run requested while claimed
    in_flight: Arc<Mutex<HashMap<PathBuf, bool>>>,
}

/// What happened to a submitted path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submit {
    Queued,
    /// Already queued or being processed; marked for another pass.
    Coalesced,
    /// Queue full; the path is left for the next sweep.
    Full,
    /// Workers are gone.
    Closed,
}

impl WorkQueue {
    /// Create a queue holding at most `capacity` paths.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PathBuf>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queue = Self {
            tx,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        };
        (queue, rx)
    }

    /// Enqueue, waiting for room.
    pub async fn submit(&self, path: PathBuf) -> Submit {
        if !self.claim(&path) {
            return Submit::Coalesced;
        }
        match self.tx.send(path).await {
            Ok(()) => Submit::Queued,
            Err(mpsc::error::SendError(path)) => {
                self.unclaim(&path);
                Submit::Closed
            }
        }
    }

    /// Enqueue from a non-async thread, waiting for room.
    pub fn submit_blocking(&self, path: PathBuf) -> Submit {
        if !self.claim(&path) {
            return Submit::Coalesced;
        }
        match self.tx.blocking_send(path) {
            Ok(()) => Submit::Queued,
            Err(mpsc::error::SendError(path)) => {
                self.unclaim(&path);
                Submit::Closed
            }
        }
    }

    /// Enqueue without waiting.
    pub fn try_submit(&self, path: PathBuf) -> Submit {
        if !self.claim(&path) {
            return Submit::Coalesced;
        }
        match self.tx.try_send(path) {
            Ok(()) => Submit::Queued,
            Err(TrySendError::Full(path)) => {
                self.unclaim(&path);
                Submit::Full
            }
            Err(TrySendError::Closed(path)) => {
                self.unclaim(&path);
                Submit::Closed
            }
        }
    }

    /// Release a path after a worker is done with it.
    ///
    /// Returns `true` if another event arrived meanwhile and the path should
    /// be looked at again.
    pub fn finish(&self, path: &Path) -> bool {
        self.lock().remove(path).unwrap_or(false)
    }

    /// Number of paths queued or being processed.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    fn claim(&self, path: &Path) -> bool {
        let mut in_flight = self.lock();
        match in_flight.get_mut(path) {
            Some(rerun) => {
                *rerun = true;
                false
            }
            None => {
                in_flight.insert(path.to_path_buf(), false);
                true
            }
        }
    }

    fn unclaim(&self, path: &Path) {
        self.lock().remove(path);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, bool>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
