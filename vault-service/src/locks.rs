//! Per-entity serialization for ratchet state mutations.
//!
//! `EncryptPayload` and `DecryptPayload` read-modify-write the same
//! `entities.server_state` row. Two concurrent calls for the same entity
//! racing a read against a write would silently drop one party's ratchet
//! step, so every handler that touches ratchet state acquires this lock for
//! the duration of its critical section before touching the database.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// A concurrent map of `eid -> mutex`. Entries are created lazily on first
/// access and never removed except by `remove`, called when an entity is
/// deleted so the map doesn't grow without bound across entity churn.
#[derive(Default)]
pub struct EntityLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Acquire the lock for `eid`, waiting if another call already holds it.
    /// The returned guard's lifetime is independent of the map, so it can be
    /// held across `.await` points without borrowing `self`.
    pub async fn acquire(&self, eid: Uuid) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(eid)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Drop the entry for `eid`. Safe to call even while a guard for `eid`
    /// is held elsewhere: the mutex itself stays alive via the guard's `Arc`
    /// until released, this only stops new callers from finding it here.
    pub fn remove(&self, eid: &Uuid) {
        self.locks.remove(eid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serializes_access_to_the_same_entity() {
        let locks = EntityLocks::new();
        let eid = Uuid::new_v4();

        let guard = locks.acquire(eid).await;
        let locks = Arc::new(locks);
        let locks2 = locks.clone();
        let handle = tokio::spawn(async move {
            let _g = locks2.acquire(eid).await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!handle.is_finished(), "second acquire must block while held");
        drop(guard);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn distinct_entities_do_not_contend() {
        let locks = EntityLocks::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let _g1 = locks.acquire(a).await;
        let _g2 = tokio::time::timeout(std::time::Duration::from_millis(50), locks.acquire(b))
            .await
            .expect("distinct entities must not block each other");
    }

    #[tokio::test]
    async fn remove_does_not_break_a_held_guard() {
        let locks = EntityLocks::new();
        let eid = Uuid::new_v4();
        let guard = locks.acquire(eid).await;
        locks.remove(&eid);
        drop(guard);

        let _g = tokio::time::timeout(std::time::Duration::from_millis(50), locks.acquire(eid))
            .await
            .expect("a fresh entry must be created after remove");
    }
}
