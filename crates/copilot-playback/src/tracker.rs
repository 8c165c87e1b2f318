//! Correlates offset requests with renderer replies.
//!
//! Every `get_track_sample_offset()` call gets a fresh request id. The pump task records
//! the renderer's answer under that id; the caller polls until it shows up. Requests
//! belonging to a pipeline that stopped before answering are flushed, so callers never
//! wait on a reply that cannot arrive.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Playback position of the track written most recently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSampleOffset {
    pub track_id: Option<String>,
    /// Samples of this track rendered so far, across pipeline restarts.
    pub offset_samples: u64,
    pub current_time_seconds: f64,
}

/// Result of checking on an outstanding request.
#[derive(Debug, Clone, PartialEq)]
pub enum OffsetPoll {
    Ready(TrackSampleOffset),
    Pending,
    /// Unknown id: never issued, already consumed, flushed, or expired.
    Abandoned,
}

#[derive(Debug)]
struct PendingRequest {
    generation: u64,
    issued_at: Instant,
    response: Option<TrackSampleOffset>,
}

/// Request/response bookkeeping for one session.
#[derive(Debug)]
pub struct TrackOffsetTracker {
    sample_rate: u32,
    expiry: Duration,
    pending: HashMap<Uuid, PendingRequest>,
    /// Samples rendered per track by pipelines that have already stopped.
    carried: HashMap<String, u64>,
    interrupted: HashSet<String>,
}

impl TrackOffsetTracker {
    pub fn new(sample_rate: u32, expiry: Duration) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            expiry,
            pending: HashMap::new(),
            carried: HashMap::new(),
            interrupted: HashSet::new(),
        }
    }

    /// Register a new request addressed to pipeline `generation`.
    pub fn issue(&mut self, generation: u64) -> Uuid {
        self.expire_stale();
        let id = Uuid::new_v4();
        self.pending.insert(
            id,
            PendingRequest {
                generation,
                issued_at: Instant::now(),
                response: None,
            },
        );
        id
    }

    /// Store the renderer's answer. Replies for unknown ids are dropped.
    pub fn record(&mut self, request_id: Uuid, track_id: Option<String>, rendered: u64) {
        let carried = track_id
            .as_deref()
            .and_then(|id| self.carried.get(id))
            .copied()
            .unwrap_or(0);
        let offset_samples = carried + rendered;
        let Some(request) = self.pending.get_mut(&request_id) else {
            return;
        };
        request.response = Some(TrackSampleOffset {
            track_id,
            offset_samples,
            current_time_seconds: offset_samples as f64 / self.sample_rate as f64,
        });
    }

    /// Take the answer if it has arrived.
    pub fn poll(&mut self, request_id: Uuid) -> OffsetPoll {
        match self.pending.get(&request_id) {
            None => OffsetPoll::Abandoned,
            Some(request) if request.response.is_none() => {
                if request.issued_at.elapsed() >= self.expiry {
                    self.pending.remove(&request_id);
                    OffsetPoll::Abandoned
                } else {
                    OffsetPoll::Pending
                }
            }
            Some(_) => match self.pending.remove(&request_id).and_then(|r| r.response) {
                Some(offset) => OffsetPoll::Ready(offset),
                None => OffsetPoll::Abandoned,
            },
        }
    }

    pub fn forget(&mut self, request_id: Uuid) {
        self.pending.remove(&request_id);
    }

    /// Drop unanswered requests addressed to a pipeline that has stopped.
    pub fn flush_generation(&mut self, generation: u64) {
        self.pending
            .retain(|_, r| r.generation != generation || r.response.is_some());
    }

    /// Fold a stopped pipeline's per-track counts into the running totals.
    pub fn carry(&mut self, rendered: &[(String, u64)]) {
        for (track_id, samples) in rendered {
            *self.carried.entry(track_id.clone()).or_insert(0) += samples;
        }
    }

    pub fn mark_interrupted(&mut self, track_id: &str) {
        self.interrupted.insert(track_id.to_string());
    }

    pub fn is_interrupted(&self, track_id: &str) -> bool {
        self.interrupted.contains(track_id)
    }

    /// Remove requests older than the expiry window, answered or not.
    pub fn expire_stale(&mut self) {
        let expiry = self.expiry;
        self.pending.retain(|_, r| r.issued_at.elapsed() < expiry);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
