//! Credential table and login attempt limiting
//!
//! Passwords from the credential document are salted and hashed at load time
//! so plaintext never outlives parsing. Verification compares digests in
//! constant time and refuses further checks for a username after too many
//! recent failures.

use crate::config::{read_json, LoadError};
use crate::state_machine::PasswordCheck;
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Question node whose answer is looked up as a username
pub const LOGIN_USERNAME_NODE: &str = "login_username";
/// Question node whose answer is verified as the bound user's password
pub const LOGIN_PASSWORD_NODE: &str = "login_password";

pub const DEFAULT_MAX_FAILURES: u32 = 5;
pub const DEFAULT_FAILURE_WINDOW: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
struct CredentialFile {
    #[serde(default)]
    users: Vec<CredentialRow>,
}

#[derive(Debug, Deserialize)]
struct CredentialRow {
    username: String,
    password: String,
}

struct StoredCredential {
    salt: [u8; 16],
    digest: [u8; 32],
}

impl StoredCredential {
    fn new(password: &str) -> Self {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        Self {
            salt,
            digest: hash_password(&salt, password),
        }
    }

    fn matches(&self, password: &str) -> bool {
        constant_time_eq(&self.digest, &hash_password(&self.salt, password))
    }
}

fn hash_password(salt: &[u8], password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Sliding-window failure counter per username
struct AttemptLimiter {
    max_failures: u32,
    window: Duration,
    failures: Mutex<HashMap<String, Vec<Instant>>>,
}

impl AttemptLimiter {
    fn new(max_failures: u32, window: Duration) -> Self {
        Self {
            max_failures,
            window,
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn with_failures<R>(&self, f: impl FnOnce(&mut HashMap<String, Vec<Instant>>) -> R) -> R {
        // A poisoned map only holds timestamps; keep using it
        let mut guard = match self.failures.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn is_throttled(&self, username: &str, now: Instant) -> bool {
        let window = self.window;
        let max = self.max_failures as usize;
        self.with_failures(|failures| {
            let Some(times) = failures.get_mut(username) else {
                return false;
            };
            times.retain(|t| now.duration_since(*t) < window);
            times.len() >= max
        })
    }

    fn record_failure(&self, username: &str, now: Instant) {
        self.with_failures(|failures| {
            failures.entry(username.to_string()).or_default().push(now);
        });
    }

    fn clear(&self, username: &str) {
        self.with_failures(|failures| {
            failures.remove(username);
        });
    }
}

/// Username to credential lookup, read-only after load
pub struct CredentialTable {
    users: HashMap<String, StoredCredential>,
    limiter: AttemptLimiter,
}

impl std::fmt::Debug for CredentialTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialTable")
            .field("users", &self.users.len())
            .finish_non_exhaustive()
    }
}

impl CredentialTable {
    /// Load `{"users":[{"username":..,"password":..}]}`.
    ///
    /// Rows with an empty username are skipped. A repeated username keeps the
    /// later password.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let file: CredentialFile = read_json(path)?;
        let table = Self::from_pairs(
            file.users
                .into_iter()
                .map(|row| (row.username, row.password)),
        );
        tracing::info!(path = %path.display(), users = table.user_count(), "Credentials loaded");
        Ok(table)
    }

    pub fn from_pairs<U, P>(pairs: impl IntoIterator<Item = (U, P)>) -> Self
    where
        U: Into<String>,
        P: AsRef<str>,
    {
        let mut users = HashMap::new();
        for (username, password) in pairs {
            let username = username.into();
            if username.is_empty() {
                tracing::warn!("Skipping credential row with empty username");
                continue;
            }
            users.insert(username, StoredCredential::new(password.as_ref()));
        }
        Self {
            users,
            limiter: AttemptLimiter::new(DEFAULT_MAX_FAILURES, DEFAULT_FAILURE_WINDOW),
        }
    }

    #[must_use]
    pub fn with_limits(mut self, max_failures: u32, window: Duration) -> Self {
        self.limiter = AttemptLimiter::new(max_failures.max(1), window);
        self
    }

    pub fn user_exists(&self, username: &str) -> bool {
        self.users.contains_key(username)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Check `password` for `username`, counting failures toward throttling.
    ///
    /// A throttled username is refused without comparing the password.
    pub fn verify(&self, username: &str, password: &str) -> PasswordCheck {
        self.verify_at(username, password, Instant::now())
    }

    fn verify_at(&self, username: &str, password: &str, now: Instant) -> PasswordCheck {
        if self.limiter.is_throttled(username, now) {
            tracing::warn!(username, "Password check throttled");
            return PasswordCheck::Throttled;
        }

        let matched = self
            .users
            .get(username)
            .is_some_and(|cred| cred.matches(password));

        if matched {
            self.limiter.clear(username);
            PasswordCheck::Accepted
        } else {
            self.limiter.record_failure(username, now);
            PasswordCheck::Rejected
        }
    }
}
