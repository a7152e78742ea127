//! Shared piece work queue
//!
//! Pending piece indices, the pieces currently claimed by workers and the
//! validated results, behind one lock. A claimed index is either completed
//! (recorded once) or handed back to the pending set; a completed index is
//! never handed out again.

use anyhow::Result;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use crate::error::TorrentError;

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<u32>,
    in_flight: BTreeSet<u32>,
    results: BTreeMap<u32, Bytes>,
}

/// Work queue shared by all download workers
#[derive(Debug)]
pub struct PieceWorkQueue {
    piece_count: u32,
    state: Mutex<QueueState>,
    /// Signalled whenever an in-flight piece settles
    settled: Notify,
}

impl PieceWorkQueue {
    /// Queue holding every index `0..piece_count`
    pub fn new(piece_count: u32) -> Self {
        Self {
            piece_count,
            state: Mutex::new(QueueState {
                pending: (0..piece_count).collect(),
                ..QueueState::default()
            }),
            settled: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the next pending piece.
    ///
    /// When nothing is pending but other workers still hold claims, waits for
    /// one of them to settle, since a failed claim puts its index back.
    /// Returns `None` once nothing is pending or in flight.
    pub async fn next_piece(self: &Arc<Self>) -> Option<PieceClaim> {
        loop {
            // registered before inspecting state so a settle in between is not missed
            let settled = self.settled.notified();
            {
                let mut state = self.lock();
                if let Some(index) = state.pending.pop_front() {
                    state.in_flight.insert(index);
                    trace!("Claimed piece {} ({} pending)", index, state.pending.len());
                    return Some(PieceClaim {
                        queue: Arc::clone(self),
                        index,
                        settled: false,
                    });
                }
                if state.in_flight.is_empty() {
                    return None;
                }
                trace!("Queue empty, waiting on {} in-flight piece(s)", state.in_flight.len());
            }
            settled.await;
        }
    }

    fn settle(&self, index: u32, data: Option<Bytes>) -> bool {
        let recorded = {
            let mut state = self.lock();
            state.in_flight.remove(&index);
            match data {
                Some(data) => {
                    if state.results.contains_key(&index) {
                        warn!("Piece {} already recorded, ignoring duplicate", index);
                        false
                    } else {
                        state.results.insert(index, data);
                        true
                    }
                }
                None => {
                    if !state.results.contains_key(&index) {
                        state.pending.push_back(index);
                        debug!("Requeued piece {}", index);
                    }
                    false
                }
            }
        };
        self.settled.notify_waiters();
        recorded
    }

    pub fn piece_count(&self) -> u32 {
        self.piece_count
    }

    pub fn completed_count(&self) -> usize {
        self.lock().results.len()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_complete(&self) -> bool {
        self.lock().results.len() == self.piece_count as usize
    }

    /// Indices without a validated result
    pub fn missing(&self) -> Vec<u32> {
        let state = self.lock();
        (0..self.piece_count).filter(|i| !state.results.contains_key(i)).collect()
    }

    /// Result for one piece, if recorded
    pub fn result(&self, index: u32) -> Option<Bytes> {
        self.lock().results.get(&index).cloned()
    }

    /// All pieces in index order, or `IncompleteDownload` listing the gaps
    pub fn ordered_pieces(&self) -> Result<Vec<Bytes>> {
        let missing = self.missing();
        if !missing.is_empty() {
            return Err(TorrentError::incomplete_download(missing).into());
        }
        Ok(self.lock().results.values().cloned().collect())
    }
}

/// A worker's hold on one piece index. Dropping an unsettled claim puts the
/// index back in the queue.
#[derive(Debug)]
pub struct PieceClaim {
    queue: Arc<PieceWorkQueue>,
    index: u32,
    settled: bool,
}

impl PieceClaim {
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Record validated bytes. Returns false if the index already had a result.
    pub fn complete(mut self, data: Bytes) -> bool {
        self.settled = true;
        self.queue.settle(self.index, Some(data))
    }

    /// Hand the index back for another worker
    pub fn requeue(mut self) {
        self.settled = true;
        self.queue.settle(self.index, None);
    }
}

impl Drop for PieceClaim {
    fn drop(&mut self) {
        if !self.settled {
            warn!("Piece {} claim dropped without a result, requeueing", self.index);
            self.queue.settle(self.index, None);
        }
    }
}
