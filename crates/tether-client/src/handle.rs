//! Subscriber handle identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counter; identifiers are never reused.
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Identifies one logical registration of a callback against a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    /// Allocate the next identifier.
    #[must_use]
    pub(crate) fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    /// The numeric value of this identifier.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}
