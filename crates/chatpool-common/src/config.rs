use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One upstream login. The password is hashed before it ever leaves the
/// process; only the hash is sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCredentials {
    pub email: String,
    pub password: String,
}

/// Final configuration for a client instance.
///
/// Every knob is explicit; there is no hidden global state. A process may
/// keep a single instance, but nothing in the crate requires it.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upstream origin, e.g. `https://chat.qwen.ai`.
    pub base_url: String,
    pub accounts: Vec<AccountCredentials>,
    pub default_model: String,
    /// Bound on simultaneously in-flight chat requests.
    pub max_concurrent_requests: usize,
    /// Additional attempts after the first failed one.
    pub max_retries: usize,
    pub upload_retries: usize,
    /// Bound on concurrent logins during pool warm-up.
    pub login_concurrency: usize,
    /// Lifetime login attempts per account before the refresh loop gives up on it.
    pub max_login_attempts: u32,
    pub refresh_interval: Duration,
    /// Accounts whose token expires within this margin are re-logged-in.
    pub token_refresh_margin: Duration,
    pub acquire_timeout: Duration,
    pub login_timeout: Duration,
    pub session_timeout: Duration,
    pub sts_timeout: Duration,
    pub upload_timeout: Duration,
    pub stream_timeout: Duration,
    /// Where the rolling stats snapshot lives. `None` disables persistence.
    pub stats_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://chat.qwen.ai".to_string(),
            accounts: Vec::new(),
            default_model: "qwen3-coder-plus".to_string(),
            max_concurrent_requests: 100,
            max_retries: 2,
            upload_retries: 3,
            login_concurrency: 3,
            max_login_attempts: 3,
            refresh_interval: Duration::from_secs(30),
            token_refresh_margin: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(15),
            login_timeout: Duration::from_secs(10),
            session_timeout: Duration::from_secs(15),
            sts_timeout: Duration::from_secs(15),
            upload_timeout: Duration::from_secs(60),
            stream_timeout: Duration::from_secs(120),
            stats_path: None,
        }
    }
}

impl ClientConfig {
    pub fn with_accounts(accounts: Vec<AccountCredentials>) -> Self {
        Self {
            accounts,
            ..Self::default()
        }
    }
}
