//! Tenant model - the billing/ownership boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Billing tier. Scales configured rate limits; never the ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "pro" => Ok(Tier::Pro),
            _ => Err(format!("Invalid tier: {}", s)),
        }
    }
}

/// Tenant entity. Created on signup; the kernel mutates only the
/// verification flag (via token redemption) and never deletes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub tenant_id: Uuid,
    pub tenant_slug: String,
    pub tier: Tier,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    /// Create a new, unverified tenant.
    pub fn new(tenant_slug: String, tier: Tier, now: DateTime<Utc>) -> Self {
        Self {
            tenant_id: Uuid::new_v4(),
            tenant_slug,
            tier,
            verified: false,
            created_at: now,
        }
    }
}
