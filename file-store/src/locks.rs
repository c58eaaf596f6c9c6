use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

/// One async mutex per username.
///
/// Held by a compression job for its whole run and by uploads, deletes and
/// downloads, so jobs of the same user run one after another and no request
/// sees a file a job is still reading or writing.
#[derive(Debug, Clone, Default)]
pub struct UserLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, username: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(username.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_user_is_exclusive_other_users_are_not() {
        let locks = UserLocks::new();
        let _alice = locks.lock("alice").await;

        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.lock("alice")).await;
        assert!(blocked.is_err());

        let bob = tokio::time::timeout(Duration::from_millis(50), locks.lock("bob")).await;
        assert!(bob.is_ok());
    }
}
