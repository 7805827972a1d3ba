//! Plan-tier entitlement gate for live debates.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Shared reference to an access policy
pub type SharedAccessPolicy = Arc<dyn AccessPolicy>;

/// Features that can be gated by plan tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    ScriptedPlayback,
    DecisionTree,
    LiveDebate,
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ScriptedPlayback => write!(f, "scripted_playback"),
            Self::DecisionTree => write!(f, "decision_tree"),
            Self::LiveDebate => write!(f, "live_debate"),
        }
    }
}

/// External entitlement lookup.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccessPolicy: Send + Sync {
    async fn check_entitlement(&self, user_id: &str, feature: Feature) -> bool;
}

/// Subscription tier of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Free,
    Premium,
}

impl PlanTier {
    /// Minimum tier required for a feature.
    pub fn required_for(feature: Feature) -> Self {
        match feature {
            Feature::ScriptedPlayback | Feature::DecisionTree => Self::Free,
            Feature::LiveDebate => Self::Premium,
        }
    }
}

/// Policy backed by a static user → tier table. Unknown users are `Free`.
#[derive(Debug, Clone, Default)]
pub struct TierAccessPolicy {
    tiers: HashMap<String, PlanTier>,
}

impl TierAccessPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user_id: impl Into<String>, tier: PlanTier) -> Self {
        self.tiers.insert(user_id.into(), tier);
        self
    }

    pub fn tier_of(&self, user_id: &str) -> PlanTier {
        self.tiers.get(user_id).copied().unwrap_or(PlanTier::Free)
    }

    pub fn shared(self) -> SharedAccessPolicy {
        Arc::new(self)
    }
}

#[async_trait]
impl AccessPolicy for TierAccessPolicy {
    async fn check_entitlement(&self, user_id: &str, feature: Feature) -> bool {
        self.tier_of(user_id) >= PlanTier::required_for(feature)
    }
}
