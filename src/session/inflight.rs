//! Per-conversation in-flight tracking

use crate::channels::ConversationKey;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Set of conversations currently being processed.
///
/// Membership is taken with [`InFlightSet::try_acquire`] and released when
/// the returned guard drops, so every exit path (return, error, panic
/// unwind, task cancellation) clears the key.
#[derive(Debug, Clone, Default)]
pub struct InFlightSet {
    keys: Arc<Mutex<HashSet<ConversationKey>>>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically insert `key`; `None` if it is already in flight
    pub fn try_acquire(&self, key: ConversationKey) -> Option<InFlightGuard> {
        if !self.lock().insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard {
            keys: self.keys.clone(),
            key,
        })
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<ConversationKey>> {
        // Critical sections are single set operations; a poisoned lock still
        // holds a consistent set
        self.keys.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Scoped membership of one key in an [`InFlightSet`]
#[derive(Debug)]
pub struct InFlightGuard {
    keys: Arc<Mutex<HashSet<ConversationKey>>>,
    key: ConversationKey,
}

impl InFlightGuard {
    pub fn key(&self) -> &ConversationKey {
        &self.key
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        keys.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::MessageKind;

    fn key(user_id: i64, group_id: Option<i64>) -> ConversationKey {
        ConversationKey {
            kind: if group_id.is_some() {
                MessageKind::Group
            } else {
                MessageKind::Private
            },
            user_id,
            group_id,
        }
    }

    #[test]
    fn test_acquire_and_release() {
        let set = InFlightSet::new();
        let guard = set.try_acquire(key(1, None)).unwrap();
        assert_eq!(guard.key(), &key(1, None));
        assert_eq!(set.len(), 1);
        assert!(set.try_acquire(key(1, None)).is_none());

        drop(guard);
        assert!(set.is_empty());
        assert!(set.try_acquire(key(1, None)).is_some());
    }

    #[test]
    fn test_duplicate_rejected_while_held() {
        let set = InFlightSet::new();
        let _guard = set.try_acquire(key(1, Some(7))).unwrap();

        assert!(set.try_acquire(key(1, Some(7))).is_none());
        // Same user in a different conversation is independent
        assert!(set.try_acquire(key(1, None)).is_some());
        assert!(set.try_acquire(key(1, Some(8))).is_some());
    }

    #[test]
    fn test_release_on_panic() {
        let set = InFlightSet::new();
        let cloned = set.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = cloned.try_acquire(key(5, None)).unwrap();
            panic!("handler blew up");
        });

        assert!(result.is_err());
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_release_on_task_abort() {
        let set = InFlightSet::new();
        let guard = set.try_acquire(key(9, None)).unwrap();

        let handle = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });
        assert_eq!(set.len(), 1);

        handle.abort();
        let _ = handle.await;
        assert!(set.is_empty());
    }
}
