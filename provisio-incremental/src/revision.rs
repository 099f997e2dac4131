//! Revision counter
//!
//! Every invalidation bumps the revision. A value computed while the
//! revision moved is never cached.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Revision number for tracking memo freshness
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision(pub u64);

impl Revision {
    pub const ZERO: Revision = Revision(0);

    pub fn next(self) -> Revision {
        Revision(self.0 + 1)
    }
}

impl Default for Revision {
    fn default() -> Self {
        Revision::ZERO
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Monotonic, shared revision clock
#[derive(Debug)]
pub struct RevisionClock {
    current: AtomicU64,
}

impl RevisionClock {
    pub fn new() -> Self {
        RevisionClock {
            current: AtomicU64::new(1),
        }
    }

    pub fn current(&self) -> Revision {
        Revision(self.current.load(Ordering::SeqCst))
    }

    /// Advance the clock, returning the new revision
    pub fn bump(&self) -> Revision {
        Revision(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

impl Default for RevisionClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_ordering() {
        let r1 = Revision(1);
        let r2 = Revision(2);

        assert!(r1 < r2);
        assert_eq!(r1.next(), r2);
    }

    #[test]
    fn test_clock_bump() {
        let clock = RevisionClock::new();
        assert_eq!(clock.current(), Revision(1));
        assert_eq!(clock.bump(), Revision(2));
        assert_eq!(clock.current(), Revision(2));
    }
}
