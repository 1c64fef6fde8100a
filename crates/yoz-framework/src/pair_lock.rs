//! Pairwise locks for two-participant state.
//!
//! Anything that changes the shared state of two users at once (a challenge,
//! a trade) must hold both users' locks. Locks are always taken in ascending
//! id order, so two symmetric initiations cannot deadlock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slot = Arc<AsyncMutex<()>>;
type Table = Arc<Mutex<HashMap<(i64, i64), Slot>>>;

/// Guard holding one user's lock until dropped.
///
/// The table entry is evicted once nobody holds or waits for it.
pub struct UserGuard {
    key: (i64, i64),
    table: Table,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UserGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut table = self.table.lock();
        if table
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            table.remove(&self.key);
        }
    }
}

impl std::fmt::Debug for UserGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserGuard")
            .field("scope", &self.key.0)
            .field("user", &self.key.1)
            .finish()
    }
}

/// Guard holding both participants' locks until dropped.
#[derive(Debug)]
pub struct PairGuard {
    _second: Option<UserGuard>,
    _first: UserGuard,
}

/// Per-(scope, user) async locks.
///
/// Entries exist only while a lock is held or awaited.
#[derive(Debug, Default)]
pub struct PairLocks {
    locks: Table,
}

impl PairLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of users currently holding or awaiting a lock.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Locks a single user.
    pub async fn lock(&self, scope: i64, user: i64) -> UserGuard {
        let key = (scope, user);
        let mut pending = UserGuard {
            key,
            table: Arc::clone(&self.locks),
            guard: None,
        };
        let slot = Arc::clone(self.locks.lock().entry(key).or_default());
        pending.guard = Some(slot.lock_owned().await);
        pending
    }

    /// Locks both users in ascending id order. `a == b` locks once.
    pub async fn lock_pair(&self, scope: i64, a: i64, b: i64) -> PairGuard {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let first = self.lock(scope, low).await;
        let second = if low == high {
            None
        } else {
            Some(self.lock(scope, high).await)
        };
        PairGuard {
            _second: second,
            _first: first,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Duel {
        Challenging(i64),
        Fighting(i64),
    }

    #[derive(Default)]
    struct Arena {
        locks: PairLocks,
        states: Mutex<HashMap<i64, Duel>>,
    }

    impl Arena {
        /// `from` challenges `to`; accepts instead if `to` already challenged `from`.
        async fn challenge(&self, from: i64, to: i64) {
            let _guard = self.locks.lock_pair(1, from, to).await;
            let pending = self.states.lock().get(&to).copied();
            tokio::task::yield_now().await;
            let mut states = self.states.lock();
            if pending == Some(Duel::Challenging(from)) {
                states.insert(from, Duel::Fighting(to));
                states.insert(to, Duel::Fighting(from));
            } else {
                states.insert(from, Duel::Challenging(to));
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_symmetric_challenges_resolve_to_one_duel() {
        for _ in 0..200 {
            let arena = Arc::new(Arena::default());
            let a = tokio::spawn({
                let arena = Arc::clone(&arena);
                async move { arena.challenge(10, 20).await }
            });
            let b = tokio::spawn({
                let arena = Arc::clone(&arena);
                async move { arena.challenge(20, 10).await }
            });
            a.await.unwrap();
            b.await.unwrap();

            let states = arena.states.lock();
            assert_eq!(states.get(&10), Some(&Duel::Fighting(20)));
            assert_eq!(states.get(&20), Some(&Duel::Fighting(10)));
        }
    }

    #[tokio::test]
    async fn test_same_user_locks_once() {
        let locks = PairLocks::new();
        let guard = tokio::time::timeout(Duration::from_secs(1), locks.lock_pair(1, 5, 5)).await;
        assert!(guard.is_ok());
    }

    #[tokio::test]
    async fn test_pair_guard_excludes_single_lock() {
        let locks = Arc::new(PairLocks::new());
        let guard = locks.lock_pair(1, 3, 4).await;

        let contender = tokio::spawn({
            let locks = Arc::clone(&locks);
            async move {
                let _g = locks.lock(1, 4).await;
            }
        });
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
        // different scope is independent
        let _other = locks.lock_pair(2, 3, 4).await;
    }

    #[tokio::test]
    async fn test_idle_entries_are_evicted() {
        let locks = Arc::new(PairLocks::new());
        for user in 0..100 {
            let _guard = locks.lock_pair(1, user, user + 1).await;
        }
        assert!(locks.is_empty());

        let held = locks.lock(1, 7).await;
        let waiter = tokio::spawn({
            let locks = Arc::clone(&locks);
            async move {
                let _g = locks.lock(1, 7).await;
            }
        });
        tokio::task::yield_now().await;
        drop(held);
        // the waiter still needs the entry
        assert_eq!(locks.len(), 1);

        waiter.await.unwrap();
        assert!(locks.is_empty());
    }
}
