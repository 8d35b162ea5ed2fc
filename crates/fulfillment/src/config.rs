use std::collections::HashSet;
use std::time::Duration;

use domain::ReferralTerms;

/// Bounded poll loop settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Wait before each query.
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_attempts: 10,
        }
    }
}

impl PollPolicy {
    /// Upper bound on how long one poll loop blocks its caller.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Settings for the provisioning coordinator.
#[derive(Debug, Clone, Default)]
pub struct FulfillmentConfig {
    pub poll: PollPolicy,
    pub referral: ReferralTerms,

    /// Provider error codes that reject an order for good. Any other
    /// provider failure leaves the order `PAID` for a retry.
    pub terminal_error_codes: HashSet<String>,
}

impl FulfillmentConfig {
    pub fn is_terminal_code(&self, code: &str) -> bool {
        self.terminal_error_codes.contains(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_poll_budget_is_thirty_seconds() {
        assert_eq!(PollPolicy::default().budget(), Duration::from_secs(30));
    }

    #[test]
    fn no_code_is_terminal_by_default() {
        let config = FulfillmentConfig::default();
        assert!(!config.is_terminal_code("200007"));
    }
}
