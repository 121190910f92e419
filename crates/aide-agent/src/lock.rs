//! Per-session mutual exclusion on top of a compare-and-swap lock store.

use crate::Clock;
use aide_llm::Timestamp;
use aide_store::{LockRecord, LockStore, StoreError, StoreResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const MAX_SWAP_ATTEMPTS: usize = 4;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LockOutcome {
    Granted {
        expires_at: Timestamp,
    },
    Busy {
        owner_request_id: String,
        expires_at: Timestamp,
    },
}

impl LockOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }
}

#[derive(Clone)]
pub struct SessionMutex {
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
}

impl SessionMutex {
    pub fn new(store: Arc<dyn LockStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Grants the lock when it is free, already ours, or expired.
    ///
    /// An expired lock is taken over without notifying its previous owner.
    pub async fn acquire(
        &self,
        session_id: &str,
        request_id: &str,
        ttl: Duration,
    ) -> StoreResult<LockOutcome> {
        for attempt in 0..MAX_SWAP_ATTEMPTS {
            let current = self.store.load_lock(session_id).await?;
            let now = self.clock.now_millis();
            if let Some(lock) = &current {
                if lock.owner_request_id != request_id && !lock.is_expired(now) {
                    return Ok(LockOutcome::Busy {
                        owner_request_id: lock.owner_request_id.clone(),
                        expires_at: lock.expires_at,
                    });
                }
            }

            let next = LockRecord {
                owner_request_id: request_id.to_string(),
                expires_at: now.saturating_add(ttl.as_millis() as u64),
            };
            let expires_at = next.expires_at;
            if self
                .store
                .compare_and_swap_lock(session_id, current.as_ref(), Some(next))
                .await?
            {
                if let Some(previous) = current.filter(|lock| lock.owner_request_id != request_id)
                {
                    info!(
                        session_id,
                        request_id,
                        previous_owner = %previous.owner_request_id,
                        "took over expired session lock"
                    );
                }
                return Ok(LockOutcome::Granted { expires_at });
            }
            debug!(session_id, request_id, attempt, "lost session lock race, retrying");
        }

        match self.store.load_lock(session_id).await? {
            Some(lock) => Ok(LockOutcome::Busy {
                owner_request_id: lock.owner_request_id,
                expires_at: lock.expires_at,
            }),
            None => Err(StoreError::Conflict(format!(
                "session lock for {session_id} kept changing during acquire"
            ))),
        }
    }

    /// Clears the lock only when `request_id` still owns it. Never fails.
    pub async fn release(&self, session_id: &str, request_id: &str) {
        for _ in 0..MAX_SWAP_ATTEMPTS {
            let current = match self.store.load_lock(session_id).await {
                Ok(current) => current,
                Err(error) => {
                    warn!(session_id, request_id, error = %error, "session lock read failed on release");
                    return;
                }
            };
            let Some(lock) = current else {
                return;
            };
            if lock.owner_request_id != request_id {
                debug!(
                    session_id,
                    request_id,
                    owner = %lock.owner_request_id,
                    "release by non-owner ignored"
                );
                return;
            }
            match self
                .store
                .compare_and_swap_lock(session_id, Some(&lock), None)
                .await
            {
                Ok(true) => return,
                Ok(false) => continue,
                Err(error) => {
                    warn!(session_id, request_id, error = %error, "session lock release failed");
                    return;
                }
            }
        }
        warn!(session_id, request_id, "session lock release gave up after repeated races");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;
    use aide_store::MemoryStore;

    const TTL: Duration = Duration::from_millis(1_000);

    fn mutex() -> (SessionMutex, ManualClock, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(10_000);
        let mutex = SessionMutex::new(store.clone(), Arc::new(clock.clone()));
        (mutex, clock, store)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn second_request_is_busy_until_release() {
        let (mutex, _clock, _store) = mutex();
        assert_eq!(
            mutex.acquire("s", "a", TTL).await.expect("acquire"),
            LockOutcome::Granted { expires_at: 11_000 }
        );
        assert_eq!(
            mutex.acquire("s", "b", TTL).await.expect("acquire"),
            LockOutcome::Busy {
                owner_request_id: "a".to_string(),
                expires_at: 11_000,
            }
        );
        mutex.release("s", "a").await;
        assert!(mutex.acquire("s", "b", TTL).await.expect("acquire").is_granted());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn reentry_by_owner_refreshes_expiry() {
        let (mutex, clock, _store) = mutex();
        mutex.acquire("s", "a", TTL).await.expect("acquire");
        clock.advance(Duration::from_millis(400));
        assert_eq!(
            mutex.acquire("s", "a", TTL).await.expect("acquire"),
            LockOutcome::Granted { expires_at: 11_400 }
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn expired_lock_is_stolen_and_late_release_is_noop() {
        let (mutex, clock, store) = mutex();
        mutex.acquire("s", "a", TTL).await.expect("acquire");

        clock.advance(Duration::from_millis(1_000));
        assert!(
            !mutex.acquire("s", "b", TTL).await.expect("acquire").is_granted(),
            "lock is still valid at exactly its expiry"
        );

        clock.advance(Duration::from_millis(1));
        assert!(mutex.acquire("s", "b", TTL).await.expect("acquire").is_granted());

        mutex.release("s", "a").await;
        let lock = store.load_lock("s").await.expect("load").expect("lock kept");
        assert_eq!(lock.owner_request_id, "b");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn locks_are_independent_per_session() {
        let (mutex, _clock, _store) = mutex();
        assert!(mutex.acquire("s1", "a", TTL).await.expect("acquire").is_granted());
        assert!(mutex.acquire("s2", "b", TTL).await.expect("acquire").is_granted());
    }
}
