//! Per-owner admission control
//!
//! Counts active (Pending or Uploading) uploads per owner and refuses new ones
//! beyond the configured ceiling. Denial is an answer, not a wait.

use std::collections::HashMap;
use std::sync::Arc;

use resumable_core::{OwnerId, SlotStatus};
use tokio::sync::Mutex;

/// Outcome of [`AdmissionQueue::try_reserve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub granted: bool,
    /// Active count after the attempt.
    pub active: usize,
    pub max_concurrent: usize,
}

#[derive(Clone)]
pub struct AdmissionQueue {
    counts: Arc<Mutex<HashMap<OwnerId, usize>>>,
    /// 0 = unlimited
    max_concurrent: usize,
}

impl AdmissionQueue {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            counts: Arc::new(Mutex::new(HashMap::new())),
            max_concurrent,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Increment the owner's count if it is below the ceiling.
    pub async fn try_reserve(&self, owner: &OwnerId) -> Reservation {
        let mut counts = self.counts.lock().await;
        let active = counts.get(owner).copied().unwrap_or(0);

        if self.max_concurrent > 0 && active >= self.max_concurrent {
            return Reservation {
                granted: false,
                active,
                max_concurrent: self.max_concurrent,
            };
        }

        counts.insert(owner.clone(), active + 1);
        Reservation {
            granted: true,
            active: active + 1,
            max_concurrent: self.max_concurrent,
        }
    }

    /// Give back one slot. Must be called exactly once per granted
    /// reservation, by whichever terminal transition wins.
    pub async fn release(&self, owner: &OwnerId) {
        let mut counts = self.counts.lock().await;
        match counts.get_mut(owner) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                counts.remove(owner);
            }
            None => {
                tracing::warn!(owner = %owner, "Admission slot released with no active reservation");
            }
        }
    }

    /// Re-count an upload that survived a restart. Ignores the ceiling.
    pub async fn restore(&self, owner: &OwnerId) {
        let mut counts = self.counts.lock().await;
        *counts.entry(owner.clone()).or_insert(0) += 1;
    }

    pub async fn snapshot(&self, owner: &OwnerId) -> SlotStatus {
        let counts = self.counts.lock().await;
        SlotStatus {
            active: counts.get(owner).copied().unwrap_or(0),
            max_concurrent: self.max_concurrent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reserve_until_full() {
        let queue = AdmissionQueue::new(2);
        let owner = OwnerId::from("u1");

        assert!(queue.try_reserve(&owner).await.granted);
        assert!(queue.try_reserve(&owner).await.granted);

        let denied = queue.try_reserve(&owner).await;
        assert_eq!(
            denied,
            Reservation {
                granted: false,
                active: 2,
                max_concurrent: 2
            }
        );

        // Other owners are unaffected
        assert!(queue.try_reserve(&OwnerId::from("u2")).await.granted);
    }

    #[tokio::test]
    async fn test_release_frees_a_slot() {
        let queue = AdmissionQueue::new(1);
        let owner = OwnerId::from("u1");

        assert!(queue.try_reserve(&owner).await.granted);
        assert!(!queue.try_reserve(&owner).await.granted);
        queue.release(&owner).await;
        assert_eq!(queue.snapshot(&owner).await.active, 0);
        assert!(queue.try_reserve(&owner).await.granted);
    }

    #[tokio::test]
    async fn test_release_without_reservation_does_not_underflow() {
        let queue = AdmissionQueue::new(1);
        let owner = OwnerId::from("u1");
        queue.release(&owner).await;
        assert_eq!(queue.snapshot(&owner).await.active, 0);
    }

    #[tokio::test]
    async fn test_zero_means_unlimited() {
        let queue = AdmissionQueue::new(0);
        let owner = OwnerId::from("u1");
        for _ in 0..100 {
            assert!(queue.try_reserve(&owner).await.granted);
        }
        assert_eq!(queue.snapshot(&owner).await.active, 100);
    }

    #[tokio::test]
    async fn test_snapshot_has_no_side_effect() {
        let queue = AdmissionQueue::new(3);
        let owner = OwnerId::from("u1");
        queue.try_reserve(&owner).await;
        let first = queue.snapshot(&owner).await;
        let second = queue.snapshot(&owner).await;
        assert_eq!(first, second);
        assert_eq!(
            first,
            SlotStatus {
                active: 1,
                max_concurrent: 3
            }
        );
    }

    #[tokio::test]
    async fn test_restore_ignores_ceiling() {
        let queue = AdmissionQueue::new(1);
        let owner = OwnerId::from("u1");
        queue.restore(&owner).await;
        queue.restore(&owner).await;
        assert_eq!(queue.snapshot(&owner).await.active, 2);
        assert!(!queue.try_reserve(&owner).await.granted);
    }
}
