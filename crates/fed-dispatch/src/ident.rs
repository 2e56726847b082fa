//! Remote object identifiers.
//!
//! Every artifact created on a worker (rewrite result, broadcast slice,
//! federated local data) is bound to an id drawn from an [`IdAllocator`]
//! before its request is built. Ids are never reused within a process.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};

pub trait IdAllocator: Send + Sync + fmt::Debug {
    fn next_id(&self) -> i64;
}

/// Monotonic counter; safe to share between concurrent coordinator
/// operations.
#[derive(Debug)]
pub struct AtomicIdAllocator {
    next: AtomicI64,
}

impl AtomicIdAllocator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Deterministic sequence `first, first + 1, ...`.
    pub fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }

    /// The allocator shared by every coordinator in this process.
    pub fn process_wide() -> Arc<AtomicIdAllocator> {
        static GLOBAL: OnceLock<Arc<AtomicIdAllocator>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(AtomicIdAllocator::new())).clone()
    }
}

impl Default for AtomicIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator for AtomicIdAllocator {
    fn next_id(&self) -> i64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
