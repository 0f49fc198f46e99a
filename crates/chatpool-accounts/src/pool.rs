use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

use chatpool_common::{ClientConfig, ClientError, ClientResult};

use crate::account::{Account, AccountId, Authenticator};
use crate::optimizer::{Optimizer, PerformanceReport};
use crate::unix_now;

/// In-call retries per login before the attempt counts as failed.
const LOGIN_TRIES: usize = 2;
const LOGIN_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Previously-failed accounts re-tried per refresh cycle.
const REFRESH_RETRY_BATCH: usize = 3;
/// Poll interval while waiting for an idle account.
const ACQUIRE_POLL: Duration = Duration::from_millis(200);

/// Owns the accounts, their login lifecycle and the KL-UCB selector.
///
/// All mutable state lives behind one mutex; the critical sections do no
/// network or file I/O. Accounts are handed out as [`AccountLease`]s so the
/// release path runs on every exit, including cancellation.
pub struct AccountPool {
    inner: Arc<PoolInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    initialized: AtomicBool,
}

struct PoolInner {
    state: Mutex<PoolState>,
    auth: Arc<dyn Authenticator>,
    config: ClientConfig,
}

struct PoolState {
    accounts: Vec<Account>,
    optimizer: Optimizer,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoolStatus {
    pub total: usize,
    pub logged_in: usize,
    pub idle: usize,
    pub busy: usize,
}

impl AccountPool {
    pub fn new(config: ClientConfig, auth: Arc<dyn Authenticator>) -> Self {
        let accounts = config.accounts.iter().map(Account::new).collect();
        let optimizer = Optimizer::new(config.stats_path.clone());
        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    accounts,
                    optimizer,
                }),
                auth,
                config,
            }),
            tasks: Mutex::new(Vec::new()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Starts the warm-up logins and the refresh loop. The pool becomes
    /// gradually usable as accounts come online; nothing blocks on full
    /// warm-up. Calling this twice is a no-op.
    pub async fn initialize(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }
        let warmup = tokio::spawn(warm_up(self.inner.clone()));
        let refresh = tokio::spawn(refresh_loop(self.inner.clone()));
        self.tasks.lock().await.extend([warmup, refresh]);
    }

    /// Picks the best idle, logged-in account, marks it busy and returns a
    /// lease for it. `weight_hint` is the caller's message length, used by
    /// the length-fit term of the score.
    pub async fn acquire(
        &self,
        weight_hint: u64,
        is_retry: bool,
        wait_timeout: Duration,
    ) -> ClientResult<AccountLease> {
        if self.inner.state.lock().await.accounts.is_empty() {
            return Err(ClientError::PoolEmpty);
        }

        let deadline = Instant::now() + wait_timeout;
        loop {
            if let Some(lease) = self.try_acquire(weight_hint, is_retry).await {
                return Ok(lease);
            }
            if Instant::now() >= deadline {
                return Err(ClientError::NoAccountAvailable {
                    waited_secs: wait_timeout.as_secs(),
                });
            }
            sleep(ACQUIRE_POLL).await;
        }
    }

    async fn try_acquire(&self, weight_hint: u64, is_retry: bool) -> Option<AccountLease> {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;

        let idle: Vec<usize> = state
            .accounts
            .iter()
            .enumerate()
            .filter(|(_, account)| account.logged_in && !account.busy)
            .map(|(index, _)| index)
            .collect();
        if idle.is_empty() {
            return None;
        }

        // A retry with every idle candidate penalized would deadlock on the
        // advisory set; wipe it instead.
        if is_retry
            && idle
                .iter()
                .all(|&index| state.optimizer.is_failed(&state.accounts[index].id))
        {
            debug!("all idle accounts penalized, clearing failed set");
            state.optimizer.reset_failed();
        }

        let candidates: Vec<&str> = idle
            .iter()
            .map(|&index| state.accounts[index].id.as_str())
            .collect();
        let chosen = state.optimizer.select(&candidates, weight_hint)?.to_string();

        let account = state
            .accounts
            .iter_mut()
            .find(|account| account.id == chosen)?;
        account.busy = true;
        debug!(account = %account.id, "account acquired");
        Some(AccountLease {
            inner: self.inner.clone(),
            id: account.id.clone(),
            email: account.email.clone(),
            token: account.token.clone(),
            user_id: account.user_id.clone(),
            released: false,
        })
    }

    pub async fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock().await;
        let logged_in = state.accounts.iter().filter(|a| a.logged_in).count();
        let busy = state
            .accounts
            .iter()
            .filter(|a| a.logged_in && a.busy)
            .count();
        PoolStatus {
            total: state.accounts.len(),
            logged_in,
            idle: logged_in - busy,
            busy,
        }
    }

    pub async fn performance_report(&self) -> PerformanceReport {
        self.inner.state.lock().await.optimizer.report()
    }

    /// Stops the background tasks, waits for them and flushes the stats
    /// snapshot.
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        for handle in tasks.iter() {
            handle.abort();
        }
        for handle in tasks.drain(..) {
            let _ = handle.await;
        }
        drop(tasks);

        let pending = self.inner.state.lock().await.optimizer.pending_snapshot();
        if let Some((path, snapshot)) = pending
            && let Err(err) = snapshot.store(&path)
        {
            warn!(path = %path.display(), error = %err, "stats snapshot flush failed");
        }
        info!("account pool shut down");
    }
}

/// A busy account held by one caller. Dropping the lease without an
/// explicit release records a failure with zeroed metrics, so a cancelled
/// request can never strand its account.
pub struct AccountLease {
    inner: Arc<PoolInner>,
    id: AccountId,
    email: String,
    token: String,
    user_id: String,
    released: bool,
}

impl std::fmt::Debug for AccountLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountLease")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("user_id", &self.user_id)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl AccountLease {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub async fn release(
        mut self,
        success: bool,
        message_length: u64,
        first_packet_delay: f64,
        generation_tokens: u64,
        generation_time: f64,
    ) {
        self.released = true;
        finish(
            &self.inner,
            &self.id,
            success,
            message_length,
            first_packet_delay,
            generation_tokens,
            generation_time,
        )
        .await;
    }
}

impl Drop for AccountLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let inner = self.inner.clone();
        let id = self.id.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                finish(&inner, &id, false, 0, 0.0, 0, 0.0).await;
            });
        }
    }
}

async fn finish(
    inner: &Arc<PoolInner>,
    id: &str,
    success: bool,
    message_length: u64,
    first_packet_delay: f64,
    generation_tokens: u64,
    generation_time: f64,
) {
    let pending = {
        let mut guard = inner.state.lock().await;
        let state = &mut *guard;
        if let Some(account) = state.accounts.iter_mut().find(|account| account.id == id) {
            account.busy = false;
        }
        state.optimizer.record_result(
            id,
            success,
            message_length,
            first_packet_delay,
            generation_tokens,
            generation_time,
        )
    };
    // Periodic flush happens here, after the lock is gone.
    if let Some((path, snapshot)) = pending
        && let Err(err) = snapshot.store(&path)
    {
        warn!(path = %path.display(), error = %err, "stats snapshot write failed");
    }
}

async fn warm_up(inner: Arc<PoolInner>) {
    let total = inner.state.lock().await.accounts.len();
    let semaphore = Arc::new(Semaphore::new(inner.config.login_concurrency.max(1)));
    let mut logins = JoinSet::new();
    for index in 0..total {
        let inner = inner.clone();
        let semaphore = semaphore.clone();
        logins.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            login_account(&inner, index).await;
        });
    }
    while logins.join_next().await.is_some() {}
    let ready = inner
        .state
        .lock()
        .await
        .accounts
        .iter()
        .filter(|a| a.logged_in)
        .count();
    info!(ready, total, "account warm-up finished");
}

async fn refresh_loop(inner: Arc<PoolInner>) {
    loop {
        sleep(inner.config.refresh_interval).await;

        let now = unix_now();
        let margin = inner.config.token_refresh_margin.as_secs_f64();
        let expiring: Vec<usize> = {
            let state = inner.state.lock().await;
            state
                .accounts
                .iter()
                .enumerate()
                .filter(|(_, a)| a.logged_in && a.token_expires_within(now, margin))
                .map(|(index, _)| index)
                .collect()
        };
        for index in expiring {
            if !login_account(&inner, index).await {
                warn!(index, "token refresh failed, account parked");
            }
        }

        let retryable: Vec<usize> = {
            let state = inner.state.lock().await;
            state
                .accounts
                .iter()
                .enumerate()
                .filter(|(_, a)| !a.logged_in && a.login_attempts < inner.config.max_login_attempts)
                .map(|(index, _)| index)
                .take(REFRESH_RETRY_BATCH)
                .collect()
        };
        for index in retryable {
            login_account(&inner, index).await;
        }
    }
}

/// Logs one account in, with the bounded in-call retry the upstream allows.
/// State transitions happen under the lock; the signin calls do not.
async fn login_account(inner: &Arc<PoolInner>, index: usize) -> bool {
    let Some((email, password_hash)) = ({
        let state = inner.state.lock().await;
        state
            .accounts
            .get(index)
            .map(|a| (a.email.clone(), a.password_hash.clone()))
    }) else {
        return false;
    };

    for attempt in 0..LOGIN_TRIES {
        match timeout(
            inner.config.login_timeout,
            inner.auth.login(&email, &password_hash),
        )
        .await
        {
            Ok(Ok(outcome)) => {
                let mut state = inner.state.lock().await;
                if let Some(account) = state.accounts.get_mut(index) {
                    account.token = outcome.token;
                    account.token_expires = outcome.expires_at;
                    account.user_id = outcome.user_id;
                    account.logged_in = true;
                    account.login_attempts = 0;
                    debug!(account = %account.id, "login ok");
                }
                return true;
            }
            Ok(Err(err)) => {
                warn!(index, attempt, error = %err, "login rejected");
            }
            Err(_) => {
                warn!(index, attempt, "login timed out");
            }
        }
        if attempt + 1 < LOGIN_TRIES {
            sleep(LOGIN_RETRY_DELAY).await;
        }
    }

    let mut state = inner.state.lock().await;
    if let Some(account) = state.accounts.get_mut(index) {
        account.logged_in = false;
        account.login_attempts += 1;
    }
    false
}
