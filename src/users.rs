//! User identity collaborator interface.

use crate::types::UserId;
use std::collections::HashMap;

/// Resolves revision authors to display names.
///
/// The engine never manages users itself; it only needs to check that a
/// stored author still resolves when a revision is loaded.
pub trait UserProvider: Send + Sync {
    /// Resolve a user ID to a display name, if known.
    fn resolve(&self, user: UserId) -> Option<String>;

    /// Check whether the user exists.
    fn exists(&self, user: UserId) -> bool {
        self.resolve(user).is_some()
    }
}

/// Fixed user table, for tests and embedded use.
#[derive(Debug, Default)]
pub struct StaticUserProvider {
    users: HashMap<UserId, String>,
}

impl StaticUserProvider {
    pub fn new(users: impl IntoIterator<Item = (UserId, String)>) -> Self {
        Self {
            users: users.into_iter().collect(),
        }
    }

    pub fn insert(&mut self, user: UserId, name: impl Into<String>) {
        self.users.insert(user, name.into());
    }
}

impl UserProvider for StaticUserProvider {
    fn resolve(&self, user: UserId) -> Option<String> {
        self.users.get(&user).cloned()
    }
}

/// Accepts every user ID, echoing a synthetic name. Useful when author
/// validation is handled elsewhere.
#[derive(Debug, Default)]
pub struct PermissiveUserProvider;

impl UserProvider for PermissiveUserProvider {
    fn resolve(&self, user: UserId) -> Option<String> {
        Some(format!("user-{}", user.0))
    }
}
