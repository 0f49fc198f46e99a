use serde::{Deserialize, Serialize};

use crate::unix_now;

/// Rolling performance counters for one account. Derived metrics are
/// computed on read, never stored. Invariant: `success_count <= total_attempts`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountStats {
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub total_attempts: u64,
    #[serde(default)]
    pub total_message_length: u64,
    #[serde(default)]
    pub total_first_packet_delay: f64,
    #[serde(default)]
    pub total_generation_tokens: u64,
    #[serde(default)]
    pub total_generation_time: f64,
    #[serde(default)]
    pub last_updated: f64,
}

impl AccountStats {
    pub fn success_rate(&self) -> f64 {
        self.success_count as f64 / (self.total_attempts.max(1)) as f64
    }

    pub fn avg_message_length(&self) -> f64 {
        self.total_message_length as f64 / (self.success_count.max(1)) as f64
    }

    pub fn avg_first_packet_delay(&self) -> f64 {
        self.total_first_packet_delay / (self.success_count.max(1)) as f64
    }

    /// Tokens per second over all successful generations.
    pub fn generation_speed(&self) -> f64 {
        self.total_generation_tokens as f64 / self.total_generation_time.max(0.001)
    }

    pub fn record_success(
        &mut self,
        message_length: u64,
        first_packet_delay: f64,
        generation_tokens: u64,
        generation_time: f64,
    ) {
        self.success_count += 1;
        self.total_attempts += 1;
        self.total_message_length += message_length;
        self.total_first_packet_delay += first_packet_delay;
        self.total_generation_tokens += generation_tokens;
        self.total_generation_time += generation_time;
        self.last_updated = unix_now();
    }

    pub fn record_failure(&mut self) {
        self.total_attempts += 1;
        self.last_updated = unix_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_metrics_track_recorded_sums() {
        let mut stats = AccountStats::default();
        stats.record_success(100, 0.5, 40, 2.0);
        stats.record_success(300, 1.5, 60, 3.0);
        stats.record_failure();

        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.total_attempts, 3);
        assert!((stats.success_rate() - 2.0 / 3.0).abs() < 1e-9);
        assert!((stats.avg_message_length() - 200.0).abs() < 1e-9);
        assert!((stats.avg_first_packet_delay() - 1.0).abs() < 1e-9);
        assert!((stats.generation_speed() - 20.0).abs() < 1e-9);
        assert!(stats.success_count <= stats.total_attempts);
    }

    #[test]
    fn fresh_stats_do_not_divide_by_zero() {
        let stats = AccountStats::default();
        assert_eq!(stats.success_rate(), 0.0);
        assert_eq!(stats.avg_first_packet_delay(), 0.0);
        assert_eq!(stats.generation_speed(), 0.0);
    }
}
