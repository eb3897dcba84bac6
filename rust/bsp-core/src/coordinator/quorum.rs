// rust/bsp-core/src/coordinator/quorum.rs

//! Barrier termination rule.
//!
//! A barrier is satisfied once every participant completed, or once the time
//! budget is spent and at least `floor(total * ratio)` completed. Cohorts of
//! [`FULL_QUORUM_MAX_PARTICIPANTS`] or fewer always need everyone: a single
//! straggler is too large a share of such a cohort to leave behind.

use std::time::Duration;

use crate::config::QuorumConfig;

/// Cohorts up to this size require full completion.
pub const FULL_QUORUM_MAX_PARTICIPANTS: usize = 10;

/// Partial-quorum settings for one barrier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuorumCriteria {
    pub total: usize,
    pub min_ratio: f64,
    pub timeout: Duration,
}

impl QuorumCriteria {
    pub fn new(total: usize, min_ratio: f64, timeout: Duration) -> Self {
        Self {
            total,
            min_ratio,
            timeout,
        }
    }

    /// Criteria for `total` participants using configured ratio and budget.
    pub fn from_config(total: usize, config: &QuorumConfig) -> Self {
        Self::new(total, config.min_ratio, Duration::from_millis(config.timeout_ms))
    }

    /// Ratio actually applied, forced to 1.0 for small cohorts.
    pub fn effective_ratio(&self) -> f64 {
        if self.total <= FULL_QUORUM_MAX_PARTICIPANTS {
            1.0
        } else {
            self.min_ratio.clamp(0.0, 1.0)
        }
    }

    /// Completions needed once the time budget is spent.
    pub fn required(&self) -> usize {
        (self.total as f64 * self.effective_ratio()).floor() as usize
    }

    pub fn is_satisfied(&self, completed: usize, elapsed: Duration) -> bool {
        completed == self.total || (elapsed >= self.timeout && completed >= self.required())
    }
}

/// Whether a barrier with `total` participants may end after `elapsed`,
/// given `completed` of them finished.
pub fn is_terminated(
    completed: usize,
    total: usize,
    min_ratio: f64,
    timeout: Duration,
    elapsed: Duration,
) -> bool {
    let criteria = QuorumCriteria::new(total, min_ratio, timeout);
    let done = criteria.is_satisfied(completed, elapsed);
    tracing::debug!(
        completed,
        total,
        ratio = criteria.effective_ratio(),
        timeout_ms = timeout.as_millis() as u64,
        elapsed_ms = elapsed.as_millis() as u64,
        done,
        "quorum check"
    );
    done
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: Duration = Duration::from_secs(1);

    #[test]
    fn test_full_completion_always_terminates() {
        for total in [1, 5, 10, 11, 1000] {
            assert!(is_terminated(total, total, 0.0, Duration::from_secs(3600), Duration::ZERO));
            assert!(is_terminated(total, total, 1.0, Duration::ZERO, Duration::ZERO));
        }
    }

    #[test]
    fn test_partial_quorum_after_timeout() {
        // total 11, ratio 0.5: partial quorum only once the budget is spent
        assert!(!is_terminated(5, 11, 0.5, SEC, Duration::from_millis(999)));
        assert!(!is_terminated(6, 11, 0.5, SEC, Duration::from_millis(999)));
        assert!(is_terminated(6, 11, 0.5, SEC, SEC));
        assert!(is_terminated(7, 11, 0.5, SEC, Duration::from_secs(2)));
        assert!(!is_terminated(4, 11, 0.5, SEC, Duration::from_secs(2)));
    }

    #[test]
    fn test_small_cohort_requires_everyone() {
        let long_ago = Duration::from_secs(3600);
        for completed in 0..10 {
            assert!(!is_terminated(completed, 10, 0.1, SEC, long_ago));
        }
        assert!(is_terminated(10, 10, 0.1, SEC, long_ago));
        assert_eq!(QuorumCriteria::new(10, 0.1, SEC).effective_ratio(), 1.0);
    }

    #[test]
    fn test_required_floors() {
        assert_eq!(QuorumCriteria::new(11, 0.5, SEC).required(), 5);
        assert_eq!(QuorumCriteria::new(1000, 0.97, SEC).required(), 970);
        assert_eq!(QuorumCriteria::new(20, 0.0, SEC).required(), 0);
    }

    #[test]
    fn test_from_config() {
        let config = QuorumConfig {
            min_ratio: 0.8,
            timeout_ms: 1500,
        };
        let criteria = QuorumCriteria::from_config(50, &config);
        assert_eq!(criteria.total, 50);
        assert_eq!(criteria.min_ratio, 0.8);
        assert_eq!(criteria.timeout, Duration::from_millis(1500));
    }
}
