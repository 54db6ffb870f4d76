//! Bound on concurrent discovery sessions.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, warn};

use crate::observability::MetricsRecorder;

/// A session was refused because the limit is reached.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("Admission limit of {limit} concurrent sessions reached")]
pub struct AdmissionRejected {
    pub limit: usize,
}

#[derive(Debug)]
struct AdmissionState {
    active: Mutex<usize>,
    /// 0 means unlimited
    limit: usize,
    metrics: MetricsRecorder,
}

impl AdmissionState {
    fn release(&self) {
        let active = {
            let mut active = self.active.lock().expect("admission lock poisoned");
            *active = active.saturating_sub(1);
            *active
        };
        self.metrics.set_active_sessions(active);
        debug!(active, "Discovery session released");
    }
}

/// Counts admitted sessions and refuses new ones at the limit.
///
/// Admission never queues: callers that want smoothing put a
/// [`ConnectionRateLimiter`](super::rate_limit::ConnectionRateLimiter) in
/// front of it.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    state: Arc<AdmissionState>,
}

impl AdmissionController {
    pub fn new(limit: usize) -> Self {
        Self {
            state: Arc::new(AdmissionState {
                active: Mutex::new(0),
                limit,
                metrics: MetricsRecorder::new(),
            }),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    pub fn limit(&self) -> usize {
        self.state.limit
    }

    pub fn active(&self) -> usize {
        *self.state.active.lock().expect("admission lock poisoned")
    }

    /// Admit one session. The returned permit releases the slot on drop.
    pub fn try_acquire(&self) -> Result<SessionPermit, AdmissionRejected> {
        let active = {
            let mut active = self.state.active.lock().expect("admission lock poisoned");
            if self.state.limit > 0 && *active >= self.state.limit {
                None
            } else {
                *active += 1;
                Some(*active)
            }
        };

        match active {
            Some(active) => {
                self.state.metrics.set_active_sessions(active);
                debug!(active, limit = self.state.limit, "Discovery session admitted");
                Ok(SessionPermit { state: self.state.clone() })
            }
            None => {
                self.state.metrics.record_admission_rejection();
                warn!(limit = self.state.limit, "Discovery session rejected, admission limit reached");
                Err(AdmissionRejected { limit: self.state.limit })
            }
        }
    }
}

/// Held for the lifetime of an admitted session.
#[derive(Debug)]
pub struct SessionPermit {
    state: Arc<AdmissionState>,
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        self.state.release();
    }
}
