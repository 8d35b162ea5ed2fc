//! Provisioned eSIM profiles.

use chrono::{DateTime, Utc};
use common::{OrderId, ProfileId};
use serde::{Deserialize, Serialize};

use crate::{DataVolume, DomainError};

/// Carrier-side lifecycle status of a profile.
///
/// Covers both the provider's eSIM status and the SM-DP+ lifecycle events
/// it forwards (download, install, enable...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProfileStatus {
    /// Resource allocated, not yet released to the device.
    #[default]
    GotResource,
    Released,
    Downloaded,
    Installed,
    Enabled,
    Disabled,
    Deleted,
    InUse,
    UsedUp,
    Expired,
    Cancelled,
    Suspended,
    Revoked,
}

impl ProfileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileStatus::GotResource => "GOT_RESOURCE",
            ProfileStatus::Released => "RELEASED",
            ProfileStatus::Downloaded => "DOWNLOADED",
            ProfileStatus::Installed => "INSTALLED",
            ProfileStatus::Enabled => "ENABLED",
            ProfileStatus::Disabled => "DISABLED",
            ProfileStatus::Deleted => "DELETED",
            ProfileStatus::InUse => "IN_USE",
            ProfileStatus::UsedUp => "USED_UP",
            ProfileStatus::Expired => "EXPIRED",
            ProfileStatus::Cancelled => "CANCELLED",
            ProfileStatus::Suspended => "SUSPENDED",
            ProfileStatus::Revoked => "REVOKED",
        }
    }

    /// Maps the provider's `esimStatus` / `smdpStatus` strings.
    pub fn from_provider(status: &str) -> Option<Self> {
        let status = match status {
            "GOT_RESOURCE" => ProfileStatus::GotResource,
            "RELEASED" => ProfileStatus::Released,
            "DOWNLOAD" | "DOWNLOADED" => ProfileStatus::Downloaded,
            "INSTALLATION" | "INSTALLED" => ProfileStatus::Installed,
            "ENABLED" => ProfileStatus::Enabled,
            "DISABLED" => ProfileStatus::Disabled,
            "DELETED" => ProfileStatus::Deleted,
            "IN_USE" => ProfileStatus::InUse,
            "USED_UP" => ProfileStatus::UsedUp,
            "USED_EXPIRED" | "UNUSED_EXPIRED" | "EXPIRED" => ProfileStatus::Expired,
            "CANCEL" | "CANCELLED" => ProfileStatus::Cancelled,
            "SUSPENDED" => ProfileStatus::Suspended,
            "REVOKED" => ProfileStatus::Revoked,
            _ => return None,
        };
        Some(status)
    }

    /// Maps an SM-DP+ lifecycle event name to the status it implies.
    ///
    /// Unrecognised events yield `None`; callers treat them as no-ops.
    pub fn from_smdp_event(event: &str) -> Option<Self> {
        match event.to_ascii_uppercase().as_str() {
            "RELEASED" | "RELEASE" => Some(ProfileStatus::Released),
            "DOWNLOAD" | "DOWNLOADED" => Some(ProfileStatus::Downloaded),
            "INSTALLATION" | "INSTALLED" | "INSTALL" => Some(ProfileStatus::Installed),
            "ENABLED" | "ENABLE" => Some(ProfileStatus::Enabled),
            "DISABLED" | "DISABLE" => Some(ProfileStatus::Disabled),
            "DELETED" | "DELETE" => Some(ProfileStatus::Deleted),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProfileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProfileStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProfileStatus::from_provider(s).ok_or_else(|| DomainError::UnknownValue {
            kind: "profile status",
            value: s.to_string(),
        })
    }
}

/// A profile as reported by the provider, keyed by its transaction number.
///
/// Applying the same upsert twice converges to the same row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpsert {
    pub esim_tran_no: String,
    pub iccid: String,
    pub qr_code_url: Option<String>,
    pub activation_code: Option<String>,
    pub status: ProfileStatus,
    pub used_volume: DataVolume,
    pub total_volume: DataVolume,
    pub expires_at: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
}

/// A persisted eSIM profile belonging to an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedProfile {
    pub id: ProfileId,
    pub order_id: OrderId,

    /// Provider transaction number; unique across all profiles.
    pub esim_tran_no: String,
    pub iccid: String,
    pub qr_code_url: Option<String>,
    pub activation_code: Option<String>,
    pub status: ProfileStatus,

    /// Last provider-reported consumption. Overwritten as reported, even if lower.
    pub used_volume: DataVolume,
    pub total_volume: DataVolume,
    pub expires_at: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProvisionedProfile {
    /// Builds a fresh row from an upsert.
    pub fn from_upsert(order_id: OrderId, upsert: ProfileUpsert, now: DateTime<Utc>) -> Self {
        Self {
            id: ProfileId::new(),
            order_id,
            esim_tran_no: upsert.esim_tran_no,
            iccid: upsert.iccid,
            qr_code_url: upsert.qr_code_url,
            activation_code: upsert.activation_code,
            status: upsert.status,
            used_volume: upsert.used_volume,
            total_volume: upsert.total_volume,
            expires_at: upsert.expires_at,
            activated_at: upsert.activated_at,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrites the provider-owned fields, keeping identity and creation time.
    pub fn apply_upsert(&mut self, upsert: ProfileUpsert, now: DateTime<Utc>) {
        self.iccid = upsert.iccid;
        self.qr_code_url = upsert.qr_code_url;
        self.activation_code = upsert.activation_code;
        self.status = upsert.status;
        self.used_volume = upsert.used_volume;
        self.total_volume = upsert.total_volume;
        self.expires_at = upsert.expires_at;
        self.activated_at = upsert.activated_at;
        self.updated_at = now;
    }

    /// Percentage of the allowance consumed, rounded down.
    pub fn percent_used(&self) -> u8 {
        self.used_volume.percent_of(self.total_volume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upsert(used: u64) -> ProfileUpsert {
        ProfileUpsert {
            esim_tran_no: "25010100000001".to_string(),
            iccid: "8985200000000000001".to_string(),
            qr_code_url: Some("https://p.example/qr/1.png".to_string()),
            activation_code: Some("LPA:1$smdp.example$ABC".to_string()),
            status: ProfileStatus::GotResource,
            used_volume: DataVolume::from_bytes(used),
            total_volume: DataVolume::from_gib(5),
            expires_at: None,
            activated_at: None,
        }
    }

    #[test]
    fn test_apply_upsert_overwrites_usage_even_when_lower() {
        let now = Utc::now();
        let mut profile = ProvisionedProfile::from_upsert(OrderId::new(), upsert(1000), now);
        let id = profile.id;

        profile.apply_upsert(upsert(10), now);

        assert_eq!(profile.id, id);
        assert_eq!(profile.used_volume.bytes(), 10);
    }

    #[test]
    fn test_smdp_event_mapping() {
        assert_eq!(
            ProfileStatus::from_smdp_event("DOWNLOAD"),
            Some(ProfileStatus::Downloaded)
        );
        assert_eq!(
            ProfileStatus::from_smdp_event("enable"),
            Some(ProfileStatus::Enabled)
        );
        assert_eq!(ProfileStatus::from_smdp_event("REBOOTED"), None);
    }

    #[test]
    fn test_provider_status_mapping() {
        assert_eq!(
            ProfileStatus::from_provider("UNUSED_EXPIRED"),
            Some(ProfileStatus::Expired)
        );
        assert_eq!(
            ProfileStatus::from_provider("CANCEL"),
            Some(ProfileStatus::Cancelled)
        );
        assert_eq!(ProfileStatus::from_provider("???"), None);
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            ProfileStatus::GotResource,
            ProfileStatus::Downloaded,
            ProfileStatus::InUse,
            ProfileStatus::Revoked,
        ] {
            assert_eq!(status.as_str().parse::<ProfileStatus>().unwrap(), status);
        }
    }
}
