//! Election timing policy.
//!
//! Both strategies tick every `retry_interval`. A lease holder keeps claiming
//! leadership for at most `renew_deadline` without a successful renewal, and
//! the lock record itself lives for `lease_duration`. The bounds are ordered
//!
//! ```text
//! 0 < retry_interval < renew_deadline < lease_duration
//! ```
//!
//! so that at least one retry fits in the grace period, and a holder stops
//! reporting leadership before its record can expire and be taken over.

use helmsman_common::ElectionError;
use helmsman_common::constants::DEFAULT_LEASE_DURATION_SECS;
use std::fmt;
use std::time::Duration;

/// Validated timing policy shared by both electors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElectionTiming {
    lease_duration: Duration,
    renew_deadline: Duration,
    retry_interval: Duration,
}

impl ElectionTiming {
    /// Build a policy from explicit values
    pub fn new(
        lease_duration: Duration,
        renew_deadline: Duration,
        retry_interval: Duration,
    ) -> Result<Self, ElectionError> {
        let timing = Self {
            lease_duration,
            renew_deadline,
            retry_interval,
        };
        timing.validate()?;
        Ok(timing)
    }

    /// Derive a policy from the lease duration alone.
    ///
    /// The retry interval is half the lease and the renew deadline takes the
    /// remainder, raised by half when it would not exceed the retry interval.
    pub fn from_lease_duration(lease_duration: Duration) -> Result<Self, ElectionError> {
        let timing = Self::derived(lease_duration);
        timing.validate()?;
        Ok(timing)
    }

    /// Unvalidated split of `lease_duration` into the three bounds
    fn derived(lease_duration: Duration) -> Self {
        let retry_interval = lease_duration / 2;
        let mut renew_deadline = lease_duration.saturating_sub(retry_interval);
        if renew_deadline <= retry_interval {
            renew_deadline += renew_deadline / 2;
        }

        Self {
            lease_duration,
            renew_deadline,
            retry_interval,
        }
    }

    pub fn from_lease_secs(secs: u64) -> Result<Self, ElectionError> {
        Self::from_lease_duration(Duration::from_secs(secs))
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    pub fn renew_deadline(&self) -> Duration {
        self.renew_deadline
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    /// Upper bound for a single backend or transport call made from a tick
    pub fn call_timeout(&self) -> Duration {
        self.retry_interval
    }

    fn validate(&self) -> Result<(), ElectionError> {
        if self.lease_duration.is_zero() {
            return Err(ElectionError::InvalidConfiguration(
                "lease duration must be > 0".to_string(),
            ));
        }

        if self.renew_deadline.is_zero() || self.renew_deadline >= self.lease_duration {
            return Err(ElectionError::InvalidConfiguration(format!(
                "renew deadline ({:?}) must be > 0 and < lease duration ({:?})",
                self.renew_deadline, self.lease_duration
            )));
        }

        if self.retry_interval.is_zero() || self.retry_interval >= self.renew_deadline {
            return Err(ElectionError::InvalidConfiguration(format!(
                "retry interval ({:?}) must be > 0 and < renew deadline ({:?})",
                self.retry_interval, self.renew_deadline
            )));
        }

        Ok(())
    }
}

impl Default for ElectionTiming {
    /// Derived policy for the default lease: 10s gives retry 5s, renew deadline 7.5s
    fn default() -> Self {
        Self::derived(Duration::from_secs(DEFAULT_LEASE_DURATION_SECS))
    }
}

impl fmt::Display for ElectionTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[lease={:?}, renew_deadline={:?}, retry={:?}]",
            self.lease_duration, self.renew_deadline, self.retry_interval
        )
    }
}
