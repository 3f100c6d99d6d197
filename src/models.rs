use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// Subscription class reported by the identity provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Hobby,
    Pro,
    #[default]
    #[serde(other)]
    Unknown,
}

// User profile as returned by the session endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    pub sub: String,
    #[serde(default)]
    pub plan: PlanTier,
}

// Authenticated caller, fixed for the lifetime of one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject: String,
    pub plan: PlanTier,
}

impl From<UserProfile> for Identity {
    fn from(profile: UserProfile) -> Self {
        Self {
            subject: profile.sub,
            plan: profile.plan,
        }
    }
}

// Upstream model listing (`GET v1/models`)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelList {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    pub data: Vec<ModelEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelEntry {
    pub id: String,
    // owned_by, created, ... kept as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
