//! Candidate queue
//!
//! Connectivity hints can arrive before the link they belong to has a remote
//! description (or before the link exists at all). They are parked here per remote id
//! and applied in arrival order once the link is ready. Ordering is only kept per
//! remote; hints for different remotes are independent.

use std::collections::HashMap;
use tracing::{debug, warn};

use super::link::PeerLink;
use super::signaling::IceCandidate;

/// Hints beyond this many per remote are dropped
pub const MAX_QUEUED_CANDIDATES: usize = 64;

#[derive(Debug, Default)]
pub struct CandidateQueue {
    pending: HashMap<String, Vec<IceCandidate>>,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a hint for `remote_id`. Returns `false` if the per-remote cap was hit.
    pub fn enqueue(&mut self, remote_id: &str, candidate: IceCandidate) -> bool {
        let queue = self.pending.entry(remote_id.to_string()).or_default();
        if queue.len() >= MAX_QUEUED_CANDIDATES {
            warn!(
                "Candidate queue for {} is full, dropping hint",
                remote_id
            );
            return false;
        }
        queue.push(candidate);
        true
    }

    /// Apply every parked hint for `remote_id` to `link` if it has a remote
    /// description. The queue is emptied before anything is applied, so a hint is
    /// never applied twice. Rejected hints are logged and skipped.
    pub async fn drain_if_ready(&mut self, remote_id: &str, link: &PeerLink) -> usize {
        if link.is_closed() || !link.has_remote_description() {
            return 0;
        }

        let Some(queued) = self.pending.remove(remote_id) else {
            return 0;
        };

        let mut applied = 0;
        for candidate in queued {
            match link.transport().add_ice_candidate(candidate).await {
                Ok(()) => applied += 1,
                Err(e) => warn!("Dropping rejected candidate for {}: {}", remote_id, e),
            }
        }

        debug!("Applied {} queued candidates for {}", applied, remote_id);
        applied
    }

    /// Discard everything parked for `remote_id`
    pub fn purge(&mut self, remote_id: &str) -> usize {
        self.pending.remove(remote_id).map_or(0, |queue| queue.len())
    }

    pub fn purge_all(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self, remote_id: &str) -> usize {
        self.pending.get(remote_id).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.values().all(Vec::is_empty)
    }
}
