use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    /// Paid and more than three days from its end.
    Active,
    /// Inside the three-day window before its end.
    Expiring,
    /// Past its end, inside the grace period. Devices stay provisioned.
    Paused,
    /// Grace period over. Terminal for automatic transitions.
    Expired,
}

impl SubscriptionStatus {
    /// Statuses in which a subscription still counts as the user's current one.
    pub const LIVE: [Self; 3] = [Self::Active, Self::Expiring, Self::Paused];

    /// Returns the stored representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expiring => "expiring",
            Self::Paused => "paused",
            Self::Expired => "expired",
        }
    }

    /// Returns true for Active, Expiring and Paused.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        !matches!(self, Self::Expired)
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "expiring" => Ok(Self::Expiring),
            "paused" => Ok(Self::Paused),
            "expired" => Ok(Self::Expired),
            other => Err(crate::Error::UnknownStatus(other.to_string())),
        }
    }
}
