use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Per-project deployment locks.
///
/// Two-level locking: the outer mutex guards the name-to-token map, and each
/// project owns an independently acquirable token that is held for the full
/// duration of a deployment. The outer mutex is always taken before a token
/// and released before the token is touched, so the two levels cannot
/// deadlock, and no lock is ever held across I/O except the token itself.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to acquire the deployment lock for a project without
    /// blocking. Returns true when the caller now owns the lock and must
    /// call `unlock` exactly once.
    pub fn try_lock(&self, project: &str) -> bool {
        let token = {
            let mut locks = self.locks.lock().expect("lock map poisoned");
            Arc::clone(
                locks
                    .entry(project.to_string())
                    .or_insert_with(|| Arc::new(AtomicBool::new(false))),
            )
        };

        token
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Releases a project's deployment lock. Calling this for a name that
    /// was never locked is a no-op.
    pub fn unlock(&self, project: &str) {
        let token = {
            let locks = self.locks.lock().expect("lock map poisoned");
            locks.get(project).cloned()
        };

        if let Some(token) = token {
            token.store(false, Ordering::Release);
        }
    }
}
