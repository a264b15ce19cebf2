//! Round-trip time estimation
//!
//! Tracks RTT samples taken when acks arrive and derives the resend timeout
//! used by the reliable channel.

use std::time::Duration;

/// RTT (Round-Trip Time) estimator
///
/// Tracks RTT measurements and calculates smoothed RTT and variance.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// Smoothed RTT (seconds)
    srtt: f64,
    /// RTT variance (seconds)
    rtt_var: f64,
    /// Number of samples
    sample_count: u32,
}

impl RttEstimator {
    /// Create a new RTT estimator
    pub fn new() -> Self {
        RttEstimator {
            srtt: 0.1, // Initial estimate: 100ms
            rtt_var: 0.05,
            sample_count: 0,
        }
    }

    /// Update with a new RTT sample
    pub fn update(&mut self, sample: Duration) {
        let sample = sample.as_secs_f64();

        if self.sample_count == 0 {
            self.srtt = sample;
            self.rtt_var = sample / 2.0;
        } else {
            let alpha = 0.125; // Smoothing factor for SRTT
            let beta = 0.25; // Smoothing factor for variance

            let error = sample - self.srtt;
            self.srtt += alpha * error;
            self.rtt_var = (1.0 - beta) * self.rtt_var + beta * error.abs();
        }

        self.sample_count = self.sample_count.saturating_add(1);
    }

    /// Smoothed RTT
    pub fn srtt(&self) -> Duration {
        Duration::from_secs_f64(self.srtt)
    }

    /// RTT variance
    pub fn rtt_var(&self) -> Duration {
        Duration::from_secs_f64(self.rtt_var)
    }

    /// Number of samples taken since creation or the last reset
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// Retransmission timeout: RTO = SRTT + 4 * RTT_VAR
    pub fn rto(&self) -> Duration {
        Duration::from_secs_f64(self.srtt + 4.0 * self.rtt_var)
    }

    /// RTO clamped into `[min, max]`
    pub fn clamped_rto(&self, min: Duration, max: Duration) -> Duration {
        self.rto().clamp(min, max.max(min))
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtt_estimator() {
        let mut estimator = RttEstimator::new();

        estimator.update(Duration::from_millis(100));
        estimator.update(Duration::from_millis(120));
        estimator.update(Duration::from_millis(90));

        let srtt = estimator.srtt();
        assert!(srtt > Duration::from_millis(90) && srtt < Duration::from_millis(120));
        assert!(estimator.rto() > Duration::from_millis(100));
        assert_eq!(estimator.sample_count(), 3);
    }

    #[test]
    fn test_first_sample_replaces_initial_estimate() {
        let mut estimator = RttEstimator::new();
        estimator.update(Duration::from_millis(20));
        assert_eq!(estimator.srtt(), Duration::from_millis(20));
        assert_eq!(estimator.rtt_var(), Duration::from_millis(10));
    }

    #[test]
    fn test_clamped_rto() {
        let mut estimator = RttEstimator::new();
        estimator.update(Duration::from_millis(1));

        let min = Duration::from_millis(50);
        let max = Duration::from_secs(1);
        assert_eq!(estimator.clamped_rto(min, max), min);

        estimator.update(Duration::from_secs(10));
        assert_eq!(estimator.clamped_rto(min, max), max);
    }

    #[test]
    fn test_reset() {
        let mut estimator = RttEstimator::new();
        estimator.update(Duration::from_millis(5));
        estimator.reset();
        assert_eq!(estimator.sample_count(), 0);
        assert_eq!(estimator.srtt(), Duration::from_millis(100));
    }
}
