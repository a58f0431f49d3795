//! Bounded request admission

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Default number of requests allowed in flight
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Returned when the ceiling is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionRejected {
    pub active: usize,
    pub limit: usize,
}

#[derive(Debug)]
struct Counters {
    active: AtomicUsize,
    limit: AtomicUsize,
}

/// Counts in-flight requests against a runtime-adjustable ceiling
#[derive(Debug, Clone)]
pub struct AdmissionController {
    counters: Arc<Counters>,
}

impl AdmissionController {
    pub fn new(limit: usize) -> Self {
        Self {
            counters: Arc::new(Counters {
                active: AtomicUsize::new(0),
                limit: AtomicUsize::new(limit),
            }),
        }
    }

    /// Claims a slot if one is free
    pub fn try_enter(&self) -> Result<AdmissionPermit, AdmissionRejected> {
        let limit = self.counters.limit.load(Ordering::Acquire);
        let mut current = self.counters.active.load(Ordering::Acquire);
        loop {
            if current >= limit {
                return Err(AdmissionRejected {
                    active: current,
                    limit,
                });
            }
            match self.counters.active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Ok(AdmissionPermit {
                        counters: Arc::clone(&self.counters),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.counters.limit.load(Ordering::Acquire)
    }

    /// Changes the ceiling; permits already granted stay valid
    pub fn set_limit(&self, limit: usize) {
        self.counters.limit.store(limit, Ordering::Release);
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}

/// One occupied slot, released on drop
#[derive(Debug)]
pub struct AdmissionPermit {
    counters: Arc<Counters>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::AcqRel);
    }
}
