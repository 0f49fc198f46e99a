use async_trait::async_trait;
use sha2::{Digest, Sha256};

use chatpool_common::{AccountCredentials, ClientResult};

/// Stable account identifier: sha256 hex of the email, so logs and the
/// stats snapshot never carry the address itself.
pub type AccountId = String;

/// One credential and its runtime login state. Owned exclusively by the
/// pool and mutated only under its mutex.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: AccountId,
    pub email: String,
    /// sha256 hex of the password; the plaintext is dropped at construction.
    pub password_hash: String,
    pub token: String,
    /// Unix seconds; 0 while logged out.
    pub token_expires: f64,
    pub user_id: String,
    pub busy: bool,
    pub logged_in: bool,
    /// Consecutive failed warm-up/refresh logins.
    pub login_attempts: u32,
}

impl Account {
    pub fn new(credentials: &AccountCredentials) -> Self {
        Self {
            id: sha256_hex(&credentials.email),
            email: credentials.email.clone(),
            password_hash: sha256_hex(&credentials.password),
            token: String::new(),
            token_expires: 0.0,
            user_id: String::new(),
            busy: false,
            logged_in: false,
            login_attempts: 0,
        }
    }

    pub fn token_expires_within(&self, now: f64, margin_secs: f64) -> bool {
        self.token_expires <= now + margin_secs
    }
}

fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Successful signin payload, already validated by the transport layer.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub token: String,
    /// Unix seconds.
    pub expires_at: f64,
    pub user_id: String,
}

/// Seam between the pool and the signin transport. The pool never touches
/// HTTP directly; tests drive it with a scripted implementation.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn login(&self, email: &str, password_hash: &str) -> ClientResult<LoginOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_stable_and_hides_the_email() {
        let account = Account::new(&AccountCredentials {
            email: "a@example.com".to_string(),
            password: "pw".to_string(),
        });
        assert_eq!(account.id.len(), 64);
        assert!(!account.id.contains('@'));
        let again = Account::new(&AccountCredentials {
            email: "a@example.com".to_string(),
            password: "other".to_string(),
        });
        assert_eq!(account.id, again.id);
    }
}
