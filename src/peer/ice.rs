use crate::peer::engine::TransportEngine;
use crate::peer::types::IceCandidate;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

/// Remote candidates that arrived before a remote description was applied.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    remote_description_applied: bool,
    pending: VecDeque<IceCandidate>,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.remote_description_applied
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Hands the candidate back when it may be applied now, buffers it otherwise.
    pub fn admit(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.remote_description_applied {
            Some(candidate)
        } else {
            debug!(
                "Remote description not set yet, queuing candidate ({} pending)",
                self.pending.len() + 1
            );
            self.pending.push_back(candidate);
            None
        }
    }

    /// Opens the gate and returns everything buffered, oldest first.
    pub fn open(&mut self) -> Vec<IceCandidate> {
        self.remote_description_applied = true;
        self.pending.drain(..).collect()
    }

    pub fn reset(&mut self) {
        self.remote_description_applied = false;
        self.pending.clear();
    }
}

/// Local candidates gathered before this side's description went out.
#[derive(Debug, Default)]
pub struct OutboundCandidates {
    released: bool,
    held: Vec<IceCandidate>,
}

impl OutboundCandidates {
    /// Returns the candidate when it can be sent right away.
    pub fn offer(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.released {
            Some(candidate)
        } else {
            self.held.push(candidate);
            None
        }
    }

    pub fn release(&mut self) -> Vec<IceCandidate> {
        self.released = true;
        std::mem::take(&mut self.held)
    }

    pub fn reset(&mut self) {
        self.released = false;
        self.held.clear();
    }
}

/// Applies candidates in order. A candidate the engine rejects is logged and skipped.
/// Returns `(applied, failed)`.
pub async fn apply_candidates(
    engine: &dyn TransportEngine,
    candidates: Vec<IceCandidate>,
) -> (usize, usize) {
    let mut applied = 0;
    let mut failed = 0;

    for candidate in candidates {
        debug!("Applying remote candidate: {}", candidate.candidate);
        match engine.add_ice_candidate(candidate).await {
            Ok(()) => applied += 1,
            Err(e) => {
                warn!("Failed to apply remote candidate: {e}");
                failed += 1;
            }
        }
    }

    (applied, failed)
}

/// Counts gathered local candidates by type.
#[derive(Debug, Default)]
pub struct CandidateTally {
    host: AtomicUsize,
    srflx: AtomicUsize,
    relay: AtomicUsize,
}

impl CandidateTally {
    pub fn record(&self, candidate: &str) {
        let counter = if candidate.contains("typ host") {
            &self.host
        } else if candidate.contains("typ srflx") {
            &self.srflx
        } else if candidate.contains("typ relay") {
            &self.relay
        } else {
            return;
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        (
            self.host.load(Ordering::Relaxed),
            self.srflx.load(Ordering::Relaxed),
            self.relay.load(Ordering::Relaxed),
        )
    }

    pub fn report(&self) {
        let (host, srflx, relay) = self.counts();
        info!("Candidate analysis: {host} host, {srflx} srflx, {relay} relay");
        if relay == 0 {
            warn!("No TURN relay candidates gathered; a direct link across symmetric NAT may fail");
        }
    }
}
