//! The process-wide session: credential store plus published state.
//!
//! `SessionStore` is the only writer of the persisted token and user. Every
//! mutation is persisted and then published on a watch channel, so a new
//! subscriber always sees the current session immediately.

use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Context, Result};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::storage::KeyValueStore;
use super::token;
use crate::models::{Role, UserRecord};

/// Storage key holding the raw bearer token
pub const TOKEN_KEY: &str = "auth_token";

/// Storage key holding the JSON-serialized user record
pub const USER_KEY: &str = "auth_user";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub token: Option<String>,
    pub user: Option<UserRecord>,
}

impl Session {
    pub fn new(token: String, user: UserRecord) -> Self {
        Self {
            token: Some(token),
            user: Some(user),
        }
    }

    /// Token present, user present and token not expired.
    pub fn is_logged_in(&self) -> bool {
        match (&self.token, &self.user) {
            (Some(token), Some(_)) => !token::is_expired(token),
            _ => false,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.is_logged_in() && self.user.as_ref().map(|u| u.role == Role::Admin).unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.token.is_none() && self.user.is_none()
    }
}

pub struct SessionStore {
    storage: Box<dyn KeyValueStore>,
    tx: watch::Sender<Session>,
    write_lock: Mutex<()>,
}

impl SessionStore {
    /// Open the store, loading and publishing whatever was persisted.
    pub fn open(storage: impl KeyValueStore + 'static) -> Self {
        let (tx, _rx) = watch::channel(Session::default());
        let store = Self {
            storage: Box::new(storage),
            tx,
            write_lock: Mutex::new(()),
        };
        let session = store.load();
        debug!(
            has_token = session.token.is_some(),
            has_user = session.user.is_some(),
            "Session loaded"
        );
        store.tx.send_replace(session);
        store
    }

    /// Read the persisted session.
    ///
    /// A user record that no longer parses clears both keys, publishes an
    /// empty session and yields it.
    pub fn load(&self) -> Session {
        let token = match self.storage.get(TOKEN_KEY) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(error = %e, "Failed to read stored token");
                None
            }
        };

        let raw_user = match self.storage.get(USER_KEY) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Failed to read stored user");
                None
            }
        };

        let user = match raw_user {
            Some(raw) => match serde_json::from_str::<UserRecord>(&raw) {
                Ok(user) => Some(user),
                Err(e) => {
                    warn!(error = %e, "Stored user record is corrupted, clearing auth data");
                    let _guard = self.lock();
                    if let Err(e) = self.remove_keys() {
                        warn!(error = %e, "Failed to clear corrupted auth data");
                    }
                    self.tx.send_replace(Session::default());
                    return Session::default();
                }
            },
            None => None,
        };

        Session { token, user }
    }

    /// Persist and publish a new token/user pair.
    ///
    /// The new session is published even when persisting fails; the error is
    /// returned so the caller can report it. A failed write leaves no keys on
    /// disk rather than a token next to another identity's user.
    pub fn save(&self, token: &str, user: &UserRecord) -> Result<()> {
        let _guard = self.lock();
        let result = self.persist(token, user);
        self.tx
            .send_replace(Session::new(token.to_string(), user.clone()));
        debug!(user_id = user.id, "Session saved");
        result
    }

    /// Replace the user snapshot, keeping the current token.
    ///
    /// Fails without touching anything when there is no token.
    pub fn update_user(&self, user: &UserRecord) -> Result<()> {
        let _guard = self.lock();
        if self.tx.borrow().token.is_none() {
            bail!("Not logged in");
        }
        let json = serde_json::to_string(user).context("Failed to serialize user")?;
        let result = self.storage.set(USER_KEY, &json);
        self.tx.send_modify(|session| session.user = Some(user.clone()));
        debug!(user_id = user.id, "Session user updated");
        result
    }

    /// Remove the persisted keys and publish an empty session.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.lock();
        let result = self.remove_keys();
        self.tx.send_replace(Session::default());
        debug!("Session cleared");
        result
    }

    /// Receiver that starts with the current session.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Session {
        self.tx.borrow().clone()
    }

    pub fn token(&self) -> Option<String> {
        self.tx.borrow().token.clone()
    }

    pub fn user(&self) -> Option<UserRecord> {
        self.tx.borrow().user.clone()
    }

    /// The token to send as a bearer header, only while logged in.
    pub fn bearer_token(&self) -> Option<String> {
        let session = self.tx.borrow();
        if session.is_logged_in() {
            session.token.clone()
        } else {
            None
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.tx.borrow().is_logged_in()
    }

    pub fn is_admin(&self) -> bool {
        self.tx.borrow().is_admin()
    }

    /// User first, token second: a token on disk always has its own user.
    fn persist(&self, token: &str, user: &UserRecord) -> Result<()> {
        let written = serde_json::to_string(user)
            .context("Failed to serialize user")
            .and_then(|json| self.storage.set(USER_KEY, &json))
            .and_then(|()| self.storage.set(TOKEN_KEY, token));
        if written.is_err() {
            if let Err(e) = self.remove_keys() {
                warn!(error = %e, "Failed to remove partially written session");
            }
        }
        written
    }

    fn remove_keys(&self) -> Result<()> {
        let token_result = self.storage.remove(TOKEN_KEY);
        let user_result = self.storage.remove(USER_KEY);
        token_result.and(user_result)
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::storage::{FileStore, MemoryStore};
    use crate::auth::token::tests::{make_token, token_expiring_in};
    use crate::models::SubscriptionStatus;

    pub(crate) fn student() -> UserRecord {
        UserRecord {
            id: 1,
            email: "student@example.com".to_string(),
            role: Role::Student,
            subscription_status: SubscriptionStatus::Active,
            first_name: Some("Ada".to_string()),
            last_name: None,
            enrolled_courses_count: 2,
            completed_courses_count: 1,
        }
    }

    pub(crate) fn admin() -> UserRecord {
        UserRecord {
            id: 2,
            email: "admin@example.com".to_string(),
            role: Role::Admin,
            first_name: Some("Rosalind".to_string()),
            last_name: Some("Franklin".to_string()),
            ..student()
        }
    }

    #[test]
    fn test_is_logged_in_requires_all_three() {
        let valid = token_expiring_in(3600);
        let expired = token_expiring_in(-60);

        assert!(Session::new(valid.clone(), student()).is_logged_in());

        // No token
        let no_token = Session { token: None, user: Some(student()) };
        assert!(!no_token.is_logged_in());

        // No user
        let no_user = Session { token: Some(valid), user: None };
        assert!(!no_user.is_logged_in());

        // Expired token
        assert!(!Session::new(expired, student()).is_logged_in());

        // Malformed token
        assert!(!Session::new("garbage".into(), student()).is_logged_in());
    }

    #[test]
    fn test_save_persists_and_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(FileStore::new(dir.path()));
        assert!(store.current().is_empty());

        let token = token_expiring_in(3600);
        store.save(&token, &student()).unwrap();
        assert!(store.is_logged_in());
        assert_eq!(store.token().as_deref(), Some(token.as_str()));

        let reopened = SessionStore::open(FileStore::new(dir.path()));
        assert_eq!(reopened.current(), Session::new(token, student()));
        assert!(reopened.is_logged_in());
    }

    #[test]
    fn test_corrupted_user_clears_auth_data() {
        let storage = MemoryStore::new();
        storage.set(TOKEN_KEY, &token_expiring_in(3600)).unwrap();
        storage.set(USER_KEY, "{not valid json").unwrap();

        let store = SessionStore::open(storage);
        assert_eq!(store.user(), None);
        assert_eq!(store.token(), None);
        assert!(!store.is_logged_in());

        // Both keys are gone from storage
        assert_eq!(store.load(), Session::default());
        assert_eq!(store.storage.get(TOKEN_KEY).unwrap(), None);
        assert_eq!(store.storage.get(USER_KEY).unwrap(), None);
    }

    /// Memory store whose writes to one key can be switched to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_key: std::sync::Mutex<Option<&'static str>>,
    }

    impl FlakyStore {
        fn fail_writes_to(&self, key: &'static str) {
            *self.fail_key.lock().unwrap() = Some(key);
        }
    }

    impl KeyValueStore for std::sync::Arc<FlakyStore> {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            if *self.fail_key.lock().unwrap() == Some(key) {
                bail!("disk full");
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn test_failed_user_write_leaves_no_mixed_pair() {
        let storage = std::sync::Arc::new(FlakyStore::default());
        let store = SessionStore::open(std::sync::Arc::clone(&storage));
        store.save(&token_expiring_in(3600), &admin()).unwrap();

        storage.fail_writes_to(USER_KEY);
        let student_token = token_expiring_in(3600);
        assert!(store.save(&student_token, &student()).is_err());

        // Published session is the new pair, never the old admin
        assert_eq!(store.current(), Session::new(student_token, student()));
        assert!(!store.is_admin());

        // Disk holds nothing rather than a student token with the admin record
        let reopened = SessionStore::open(std::sync::Arc::clone(&storage));
        assert_eq!(reopened.current(), Session::default());
        assert!(!reopened.is_admin());
    }

    #[test]
    fn test_failed_token_write_removes_user() {
        let storage = std::sync::Arc::new(FlakyStore::default());
        let store = SessionStore::open(std::sync::Arc::clone(&storage));
        store.save(&token_expiring_in(3600), &admin()).unwrap();

        storage.fail_writes_to(TOKEN_KEY);
        assert!(store.save(&token_expiring_in(3600), &student()).is_err());
        assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);
        assert_eq!(storage.get(USER_KEY).unwrap(), None);
    }

    #[test]
    fn test_corrupted_user_after_open_is_published() {
        let store = SessionStore::open(MemoryStore::new());
        store.save(&token_expiring_in(3600), &student()).unwrap();
        let rx = store.subscribe();

        store.storage.set(USER_KEY, "{corrupt").unwrap();
        assert_eq!(store.load(), Session::default());

        assert!(!store.is_logged_in());
        assert!(rx.borrow().is_empty());
        assert_eq!(store.storage.get(TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_update_user_requires_token() {
        let store = SessionStore::open(MemoryStore::new());
        assert!(store.update_user(&student()).is_err());
        assert_eq!(store.current(), Session::default());
        assert_eq!(store.load(), Session::default());
    }

    #[test]
    fn test_clear_removes_everything() {
        let store = SessionStore::open(MemoryStore::new());
        store.save(&token_expiring_in(3600), &student()).unwrap();
        store.clear().unwrap();

        assert!(store.current().is_empty());
        assert_eq!(store.load(), Session::default());
    }

    #[test]
    fn test_update_user_replaces_snapshot() {
        let store = SessionStore::open(MemoryStore::new());
        let token = token_expiring_in(3600);
        store.save(&token, &student()).unwrap();

        let mut promoted = student();
        promoted.role = Role::Admin;
        promoted.completed_courses_count = 2;
        store.update_user(&promoted).unwrap();

        assert_eq!(store.user(), Some(promoted.clone()));
        assert_eq!(store.token(), Some(token));
        assert!(store.is_admin());
        assert_eq!(store.load().user, Some(promoted));
    }

    #[test]
    fn test_late_subscriber_sees_current_session() {
        let store = SessionStore::open(MemoryStore::new());
        let token = token_expiring_in(3600);
        store.save(&token, &student()).unwrap();

        let rx = store.subscribe();
        assert_eq!(rx.borrow().token.as_deref(), Some(token.as_str()));
    }

    #[tokio::test]
    async fn test_subscriber_is_notified_of_clear() {
        let store = SessionStore::open(MemoryStore::new());
        store.save(&token_expiring_in(3600), &student()).unwrap();

        let mut rx = store.subscribe();
        store.clear().unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_empty());
    }

    #[test]
    fn test_bearer_token_only_while_logged_in() {
        let store = SessionStore::open(MemoryStore::new());
        store.save(&make_token(serde_json::json!({})), &student()).unwrap();
        assert_eq!(store.bearer_token(), None);

        let token = token_expiring_in(3600);
        store.save(&token, &student()).unwrap();
        assert_eq!(store.bearer_token(), Some(token));
    }

    #[test]
    fn test_token_without_user_is_not_logged_in() {
        let storage = MemoryStore::new();
        storage.set(TOKEN_KEY, &token_expiring_in(3600)).unwrap();
        let store = SessionStore::open(storage);
        assert!(store.token().is_some());
        assert!(!store.is_logged_in());
    }
}
