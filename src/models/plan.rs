use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Subscription tiers a user account can be on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Basic,
    Pro,
    Enterprise,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Basic => "basic",
            PlanTier::Pro => "pro",
            PlanTier::Enterprise => "enterprise",
        }
    }

    /// Image allowance that comes with the tier.
    pub fn images_limit(&self) -> ImagesLimit {
        match self {
            PlanTier::Free => ImagesLimit::Limited(5),
            PlanTier::Basic => ImagesLimit::Limited(50),
            PlanTier::Pro => ImagesLimit::Limited(200),
            PlanTier::Enterprise => ImagesLimit::Unlimited,
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown plan: {0}")]
pub struct UnknownPlan(pub String);

impl FromStr for PlanTier {
    type Err = UnknownPlan;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(PlanTier::Free),
            "basic" => Ok(PlanTier::Basic),
            "pro" => Ok(PlanTier::Pro),
            "enterprise" => Ok(PlanTier::Enterprise),
            _ => Err(UnknownPlan(s.to_string())),
        }
    }
}

/// Number of images an account may process. Serialized as `-1` when unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum ImagesLimit {
    Limited(u32),
    Unlimited,
}

impl ImagesLimit {
    pub fn is_unlimited(&self) -> bool {
        matches!(self, ImagesLimit::Unlimited)
    }

    /// Whether another image may be admitted after `processed` have been used.
    pub fn allows(&self, processed: u32) -> bool {
        match self {
            ImagesLimit::Unlimited => true,
            ImagesLimit::Limited(limit) => processed < *limit,
        }
    }

    pub fn remaining(&self, processed: u32) -> Option<u32> {
        match self {
            ImagesLimit::Unlimited => None,
            ImagesLimit::Limited(limit) => Some(limit.saturating_sub(processed)),
        }
    }
}

impl From<ImagesLimit> for i64 {
    fn from(limit: ImagesLimit) -> Self {
        match limit {
            ImagesLimit::Unlimited => -1,
            ImagesLimit::Limited(n) => i64::from(n),
        }
    }
}

impl TryFrom<i64> for ImagesLimit {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(ImagesLimit::Unlimited),
            n if n > 0 => u32::try_from(n)
                .map(ImagesLimit::Limited)
                .map_err(|_| format!("images limit {} is out of range", n)),
            n => Err(format!("images limit must be positive or -1, got {}", n)),
        }
    }
}

impl fmt::Display for ImagesLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImagesLimit::Unlimited => f.write_str("unlimited"),
            ImagesLimit::Limited(n) => write!(f, "{}", n),
        }
    }
}

/// A subscription tier as presented to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub id: PlanTier,
    pub display_name: &'static str,
    /// Price per month in `currency` units (not cents).
    pub monthly_price: Decimal,
    pub currency: &'static str,
    pub images_limit: ImagesLimit,
    pub features: Vec<&'static str>,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    pub plan: String,
    pub payment_token: String,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub plan: PlanTier,
    pub plan_name: &'static str,
    pub images_processed: u32,
    pub images_limit: ImagesLimit,
    pub status: &'static str,
}
