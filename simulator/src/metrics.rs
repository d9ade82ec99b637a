//! Simulation metrics.

use std::collections::VecDeque;

use txncoord_coordinator::CommitDecision;

/// Simulation metrics.
#[derive(Debug, Clone)]
pub struct SimulationMetrics {
    /// Transactions that reached a decision.
    pub total_transactions: u64,
    /// Committed transactions.
    pub committed: u64,
    /// Aborted transactions.
    pub aborted: u64,
    /// Transactions that could not be started.
    pub rejected: u64,
    /// Decision latency samples (ms).
    latency_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            total_transactions: 0,
            committed: 0,
            aborted: 0,
            rejected: 0,
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    /// Record a decided transaction.
    pub fn record_decision(&mut self, decision: CommitDecision, latency_ms: u64) {
        self.total_transactions += 1;
        match decision {
            CommitDecision::Commit => self.committed += 1,
            CommitDecision::Abort => self.aborted += 1,
        }

        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_ms);
    }

    /// Record a transaction whose coordinator could not be created.
    pub fn record_rejected(&mut self) {
        self.rejected += 1;
    }

    /// Get average latency in ms.
    pub fn average_latency_ms(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    /// Get p50 latency.
    pub fn p50_latency_ms(&self) -> u64 {
        self.percentile_latency(50)
    }

    /// Get p99 latency.
    pub fn p99_latency_ms(&self) -> u64 {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Share of decided transactions that committed.
    pub fn commit_rate(&self) -> f64 {
        if self.total_transactions == 0 {
            return 0.0;
        }

        self.committed as f64 / self.total_transactions as f64
    }

    /// Decided transactions per second.
    pub fn throughput(&self, duration_secs: u64) -> f64 {
        if duration_secs == 0 {
            return 0.0;
        }

        self.total_transactions as f64 / duration_secs as f64
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let mut metrics = SimulationMetrics::new();

        metrics.record_decision(CommitDecision::Commit, 100);
        metrics.record_decision(CommitDecision::Commit, 200);
        metrics.record_decision(CommitDecision::Commit, 150);
        metrics.record_decision(CommitDecision::Abort, 50);
        metrics.record_rejected();

        assert_eq!(metrics.total_transactions, 4);
        assert_eq!(metrics.committed, 3);
        assert_eq!(metrics.aborted, 1);
        assert_eq!(metrics.rejected, 1);
        assert_eq!(metrics.average_latency_ms(), 125);
        assert_eq!(metrics.p50_latency_ms(), 150);
        assert_eq!(metrics.p99_latency_ms(), 200);
        assert_eq!(metrics.commit_rate(), 0.75);
        assert_eq!(metrics.throughput(2), 2.0);
    }

    #[test]
    fn test_empty_metrics() {
        let metrics = SimulationMetrics::default();
        assert_eq!(metrics.average_latency_ms(), 0);
        assert_eq!(metrics.p99_latency_ms(), 0);
        assert_eq!(metrics.commit_rate(), 0.0);
        assert_eq!(metrics.throughput(0), 0.0);
    }
}
