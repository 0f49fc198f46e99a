use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use serde::Serialize;

use crate::snapshot::StatsSnapshot;
use crate::stats::AccountStats;
use crate::AccountId;

/// Bisection budget for the KL upper bound. Tuned empirically upstream;
/// treated as configurable constants rather than load-bearing invariants.
pub const KL_BISECTION_ITERS: usize = 100;
pub const KL_PRECISION: f64 = 1e-6;

const UCB_WEIGHT: f64 = 0.4;
const DELAY_WEIGHT: f64 = 0.25;
const SPEED_WEIGHT: f64 = 0.25;
const LENGTH_WEIGHT: f64 = 0.1;
const FAILED_PENALTY: f64 = 0.1;
const SNAPSHOT_EVERY: u64 = 5;

/// Largest q in [p, 1) whose KL divergence from the empirical rate p stays
/// within `level`, found by bisection. KL(p‖q) = p·ln(p/q) + (1−p)·ln((1−p)/(1−q)).
pub fn kl_ucb_upper_bound(p: f64, level: f64) -> f64 {
    if p >= 1.0 - KL_PRECISION {
        return 1.0;
    }
    if level <= KL_PRECISION {
        return p;
    }

    let mut low = p;
    let mut high = 1.0;
    for _ in 0..KL_BISECTION_ITERS {
        let mid = (low + high) / 2.0;
        if mid <= KL_PRECISION || mid >= 1.0 - KL_PRECISION {
            break;
        }

        let mut kl = 0.0;
        if p > KL_PRECISION {
            kl += p * (p / mid).ln();
        }
        if p < 1.0 - KL_PRECISION {
            kl += (1.0 - p) * ((1.0 - p) / (1.0 - mid)).ln();
        }

        if kl <= level {
            low = mid;
        } else {
            high = mid;
        }
        if high - low < KL_PRECISION {
            break;
        }
    }
    (low + high) / 2.0
}

/// KL-UCB account selector with an advisory failed set. Owned by the pool
/// and only ever touched under its mutex.
pub struct Optimizer {
    stats: HashMap<AccountId, AccountStats>,
    global_attempts: u64,
    failed: HashSet<AccountId>,
    stats_path: Option<PathBuf>,
}

impl Optimizer {
    /// Loads the previous snapshot if one exists; a missing or corrupt file
    /// starts empty.
    pub fn new(stats_path: Option<PathBuf>) -> Self {
        let snapshot = stats_path
            .as_deref()
            .map(StatsSnapshot::load)
            .unwrap_or_default();
        Self {
            stats: snapshot.account_stats,
            global_attempts: snapshot.global_attempts,
            failed: snapshot.failed_accounts,
            stats_path,
        }
    }

    /// Composite score for one account. An account with no recorded
    /// attempts scores +inf so it is always explored first.
    pub fn score(&self, id: &str, weight_hint: u64) -> f64 {
        let Some(stats) = self.stats.get(id) else {
            return f64::INFINITY;
        };
        if stats.total_attempts == 0 {
            return f64::INFINITY;
        }

        let penalty = if self.failed.contains(id) {
            FAILED_PENALTY
        } else {
            1.0
        };

        let confidence =
            ((self.global_attempts.max(1)) as f64).ln() / stats.total_attempts as f64;
        let ucb = kl_ucb_upper_bound(stats.success_rate(), confidence);

        let delay_score = if stats.success_count > 0 {
            1.0 / (1.0 + stats.avg_first_packet_delay())
        } else {
            0.5
        };

        let speed_score = if stats.success_count > 0 && stats.total_generation_time > 0.0 {
            (stats.generation_speed() / 50.0).min(2.0)
        } else {
            0.5
        };

        let length_fit = if stats.success_count > 0 && weight_hint > 0 {
            (stats.avg_message_length() / weight_hint.max(1) as f64).min(2.0)
        } else {
            1.0
        };

        (ucb * UCB_WEIGHT
            + delay_score * DELAY_WEIGHT
            + speed_score * SPEED_WEIGHT
            + length_fit * LENGTH_WEIGHT)
            * penalty
    }

    /// Argmax of [`Self::score`] over the candidate set; ties keep the
    /// earliest candidate.
    pub fn select<'a>(&self, candidates: &[&'a str], weight_hint: u64) -> Option<&'a str> {
        let mut best: Option<(&str, f64)> = None;
        for id in candidates {
            let score = self.score(id, weight_hint);
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((id, score)),
            }
        }
        best.map(|(id, _)| id)
    }

    /// Records one attempt outcome. Returns a snapshot to persist when the
    /// periodic flush is due, so the caller can write it outside the pool lock.
    pub fn record_result(
        &mut self,
        id: &str,
        success: bool,
        message_length: u64,
        first_packet_delay: f64,
        generation_tokens: u64,
        generation_time: f64,
    ) -> Option<(PathBuf, StatsSnapshot)> {
        let stats = self.stats.entry(id.to_string()).or_default();
        if success {
            stats.record_success(
                message_length,
                first_packet_delay,
                generation_tokens,
                generation_time,
            );
            self.failed.remove(id);
        } else {
            stats.record_failure();
            self.failed.insert(id.to_string());
        }
        self.global_attempts += 1;

        if self.global_attempts % SNAPSHOT_EVERY == 0 {
            self.pending_snapshot()
        } else {
            None
        }
    }

    pub fn pending_snapshot(&self) -> Option<(PathBuf, StatsSnapshot)> {
        let path = self.stats_path.clone()?;
        Some((path, self.snapshot()))
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            version: crate::SNAPSHOT_VERSION,
            account_stats: self.stats.clone(),
            global_attempts: self.global_attempts,
            failed_accounts: self.failed.clone(),
        }
    }

    pub fn is_failed(&self, id: &str) -> bool {
        self.failed.contains(id)
    }

    pub fn reset_failed(&mut self) {
        self.failed.clear();
    }

    pub fn global_attempts(&self) -> u64 {
        self.global_attempts
    }

    pub fn report(&self) -> PerformanceReport {
        let mut accounts: Vec<AccountReport> = self
            .stats
            .iter()
            .map(|(id, stats)| AccountReport {
                id: id.clone(),
                success_rate: stats.success_rate(),
                success_count: stats.success_count,
                total_attempts: stats.total_attempts,
                avg_first_packet_delay: stats.avg_first_packet_delay(),
                generation_speed: stats.generation_speed(),
                avg_message_length: stats.avg_message_length(),
                score: self.score(id, 0),
                failed_this_round: self.failed.contains(id),
            })
            .collect();
        accounts.sort_by(|a, b| b.score.total_cmp(&a.score));

        let total_successes: u64 = self.stats.values().map(|s| s.success_count).sum();
        let total_attempts: u64 = self.stats.values().map(|s| s.total_attempts).sum();
        PerformanceReport {
            total_accounts: self.stats.len(),
            global_attempts: self.global_attempts,
            failed_accounts: self.failed.len(),
            efficiency: if total_attempts > 0 {
                total_successes as f64 / total_attempts as f64
            } else {
                0.0
            },
            accounts,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub total_accounts: usize,
    pub global_attempts: u64,
    pub failed_accounts: usize,
    /// Pool-wide success ratio over all recorded attempts.
    pub efficiency: f64,
    pub accounts: Vec<AccountReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountReport {
    pub id: AccountId,
    pub success_rate: f64,
    pub success_count: u64,
    pub total_attempts: u64,
    pub avg_first_packet_delay: f64,
    pub generation_speed: f64,
    pub avg_message_length: f64,
    pub score: f64,
    pub failed_this_round: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(id: &str, optimizer: &mut Optimizer, successes: u64, failures: u64, delay: f64) {
        for _ in 0..successes {
            optimizer.record_result(id, true, 100, delay, 50, 1.0);
        }
        for _ in 0..failures {
            optimizer.record_result(id, false, 0, 0.0, 0, 0.0);
        }
    }

    #[test]
    fn ucb_bound_stays_in_range_and_grows_with_confidence() {
        for p in [0.0, 0.1, 0.5, 0.9, 0.999] {
            for level in [0.01, 0.1, 1.0, 4.0] {
                let bound = kl_ucb_upper_bound(p, level);
                assert!(bound >= p - KL_PRECISION, "bound below p for p={p}");
                assert!(bound <= 1.0, "bound above 1 for p={p}");
            }
            let narrow = kl_ucb_upper_bound(p, 0.01);
            let wide = kl_ucb_upper_bound(p, 2.0);
            assert!(wide >= narrow - KL_PRECISION);
        }
    }

    #[test]
    fn zero_attempt_account_scores_infinite() {
        let optimizer = Optimizer::new(None);
        assert_eq!(optimizer.score("unseen", 0), f64::INFINITY);
    }

    #[test]
    fn better_account_outranks_worse_at_equal_attempts() {
        let mut optimizer = Optimizer::new(None);
        seeded("good", &mut optimizer, 9, 1, 0.1);
        seeded("bad", &mut optimizer, 5, 5, 2.0);
        // Clear the advisory penalty left by the seeded failures.
        optimizer.reset_failed();
        assert!(optimizer.score("good", 0) > optimizer.score("bad", 0));
        assert_eq!(optimizer.select(&["bad", "good"], 0), Some("good"));
    }

    #[test]
    fn fresh_account_wins_over_perfect_veteran() {
        let mut optimizer = Optimizer::new(None);
        seeded("veteran", &mut optimizer, 10, 0, 0.1);
        assert_eq!(optimizer.select(&["veteran", "fresh"], 0), Some("fresh"));
    }

    #[test]
    fn failure_penalty_applies_and_clears_on_success() {
        let mut optimizer = Optimizer::new(None);
        seeded("acct", &mut optimizer, 5, 0, 0.1);
        let clean = optimizer.score("acct", 0);

        optimizer.record_result("acct", false, 0, 0.0, 0, 0.0);
        assert!(optimizer.is_failed("acct"));
        assert!(optimizer.score("acct", 0) < clean * 0.2);

        optimizer.record_result("acct", true, 100, 0.1, 50, 1.0);
        assert!(!optimizer.is_failed("acct"));
    }

    #[test]
    fn length_hint_prefers_accounts_used_to_long_replies() {
        let mut optimizer = Optimizer::new(None);
        for _ in 0..5 {
            optimizer.record_result("long", true, 4000, 0.5, 50, 1.0);
            optimizer.record_result("short", true, 50, 0.5, 50, 1.0);
        }
        assert!(optimizer.score("long", 2000) > optimizer.score("short", 2000));
    }
}
