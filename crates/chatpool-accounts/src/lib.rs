mod account;
mod optimizer;
mod pool;
mod snapshot;
mod stats;

pub use account::{Account, AccountId, Authenticator, LoginOutcome};
pub use optimizer::{
    AccountReport, KL_BISECTION_ITERS, KL_PRECISION, Optimizer, PerformanceReport,
    kl_ucb_upper_bound,
};
pub use pool::{AccountLease, AccountPool, PoolStatus};
pub use snapshot::{SNAPSHOT_VERSION, StatsSnapshot};
pub use stats::AccountStats;

pub(crate) fn unix_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
