use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out per-request sequence numbers and stable request UUIDs.
///
/// The UUID mixes a per-process random seed with the sequence, so ids do not
/// repeat across restarts.
pub(crate) struct RequestIdGenerator {
    seed: u128,
    next: AtomicU64,
}

impl RequestIdGenerator {
    #[must_use]
    pub(crate) fn new() -> Self {
        let seed = (u128::from(fastrand::u64(..)) << 64) | u128::from(fastrand::u64(..));
        Self {
            seed,
            next: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_seq(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    #[must_use]
    pub(crate) fn request_uuid(&self, seq: u64) -> uuid::Uuid {
        uuid::Uuid::from_u128(self.seed ^ u128::from(seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_starts_at_one() {
        let ids = RequestIdGenerator::new();
        assert_eq!(ids.next_seq(), 1);
        assert_eq!(ids.next_seq(), 2);
        assert_eq!(ids.request_uuid(7), ids.request_uuid(7));
    }
}
