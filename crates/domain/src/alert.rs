//! Usage alerts.

use chrono::{DateTime, Utc};
use common::{AlertId, ProfileId};
use serde::{Deserialize, Serialize};

use crate::{DataVolume, DomainError, ProvisionedProfile};

/// Which channels an alert notifies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertChannels {
    pub email: bool,
    pub push: bool,
}

impl Default for AlertChannels {
    fn default() -> Self {
        Self {
            email: true,
            push: false,
        }
    }
}

/// Request to watch a profile's consumption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUsageAlert {
    pub profile_id: ProfileId,
    pub threshold: u8,
    pub channels: AlertChannels,
}

impl NewUsageAlert {
    pub fn new(
        profile_id: ProfileId,
        threshold: u8,
        channels: AlertChannels,
    ) -> Result<Self, DomainError> {
        if !(1..=100).contains(&threshold) {
            return Err(DomainError::InvalidThreshold(threshold));
        }
        Ok(Self {
            profile_id,
            threshold,
            channels,
        })
    }
}

/// A per-profile consumption threshold that fires at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageAlert {
    pub id: AlertId,
    pub profile_id: ProfileId,

    /// Whole percentage of the total allowance.
    pub threshold: u8,
    pub channels: AlertChannels,
    pub triggered: bool,
    pub triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl UsageAlert {
    pub fn from_new(new: NewUsageAlert, now: DateTime<Utc>) -> Self {
        Self {
            id: AlertId::new(),
            profile_id: new.profile_id,
            threshold: new.threshold,
            channels: new.channels,
            triggered: false,
            triggered_at: None,
            created_at: now,
        }
    }

    /// Returns true if the alert has not fired yet and usage has reached it.
    pub fn should_fire(&self, used: DataVolume, total: DataVolume) -> bool {
        !self.triggered && used.reaches_threshold(total, self.threshold)
    }

    /// Marks the alert as fired.
    ///
    /// Must be called under the same lock or transaction that checked
    /// [`UsageAlert::should_fire`].
    pub fn fire(&mut self, now: DateTime<Utc>) {
        self.triggered = true;
        self.triggered_at = Some(now);
    }
}

/// An alert that fired during a usage update, ready for notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggeredAlert {
    pub alert: UsageAlert,
    pub profile: ProvisionedProfile,
    pub percent_used: u8,
}
