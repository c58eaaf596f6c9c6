use std::collections::HashMap;
use std::path::Path;

use scrypt::{
    password_hash::{PasswordHash, PasswordVerifier},
    Scrypt,
};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum UserStoreError {
    #[error("unable to read users file: {0}")]
    Read(#[from] std::io::Error),

    #[error("unable to parse users file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub username: String,
    pub password_hash: String,
    #[serde(default)]
    pub admin: bool,
}

/// Accounts loaded from a JSON array of `{username, password_hash, admin}`.
#[derive(Debug, Default)]
pub struct UserStore {
    users: HashMap<String, User>,
}

impl UserStore {
    pub fn load(path: &Path) -> Result<Self, UserStoreError> {
        let raw = std::fs::read_to_string(path)?;
        let users: Vec<User> = serde_json::from_str(&raw)?;
        Ok(Self::from_users(users))
    }

    pub fn from_users(users: impl IntoIterator<Item = User>) -> Self {
        UserStore {
            users: users.into_iter().map(|user| (user.username.clone(), user)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// The user, if `password` matches the stored hash.
    pub fn verify_credentials(&self, username: &str, password: &str) -> Option<&User> {
        let Some(user) = self.users.get(username) else {
            tracing::debug!("User not found: {}", username);
            return None;
        };

        if password_equals(&user.password_hash, password) {
            Some(user)
        } else {
            tracing::debug!("Invalid password for user: {}", username);
            None
        }
    }
}

/// Checks if the provided password matches the hashed password.
///
/// A hash that cannot be parsed never matches.
fn password_equals(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed_hash) => Scrypt.verify_password(password.as_bytes(), &parsed_hash).is_ok(),
        Err(err) => {
            tracing::error!("Failed to parse password hash: {}", err);
            false
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use scrypt::{
        password_hash::{PasswordHasher, SaltString, rand_core::OsRng},
        Params,
    };

    // cheap parameters, the defaults take seconds in debug builds
    pub(crate) fn fast_hash(password: &str) -> String {
        let salt = SaltString::generate(OsRng);
        let params = Params::new(4, 8, 1, 32).unwrap();
        Scrypt
            .hash_password_customized(password.as_bytes(), None, None, params, &salt)
            .unwrap()
            .to_string()
    }

    pub(crate) fn store() -> UserStore {
        UserStore::from_users([
            User { username: "alice".into(), password_hash: fast_hash("password"), admin: false },
            User { username: "admin".into(), password_hash: fast_hash("admin"), admin: true },
        ])
    }

    #[test]
    fn credentials_are_checked_against_hash() {
        let store = store();
        assert!(store.verify_credentials("alice", "password").is_some());
        assert!(store.verify_credentials("alice", "wrong").is_none());
        assert!(store.verify_credentials("mallory", "password").is_none());
        assert!(store.verify_credentials("admin", "admin").unwrap().admin);
    }

    #[test]
    fn corrupt_hash_never_matches() {
        let store = UserStore::from_users([User {
            username: "bob".into(),
            password_hash: "not-a-phc-string".into(),
            admin: false,
        }]);
        assert!(store.verify_credentials("bob", "not-a-phc-string").is_none());
    }

    #[test]
    fn loads_users_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        let json = serde_json::json!([
            { "username": "alice", "password_hash": fast_hash("password") },
            { "username": "admin", "password_hash": fast_hash("admin"), "admin": true },
        ]);
        std::fs::write(&path, json.to_string()).unwrap();

        let store = UserStore::load(&path).unwrap();
        assert_eq!(store.len(), 2);
        assert!(!store.verify_credentials("alice", "password").unwrap().admin);
    }
}
