//! A webhook subscription: which connector it belongs to, the secret and algorithm used
//! to verify incoming signatures, the signal type it produces, and the payload mapping.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::mapping::PayloadMapping;
use crate::signature::SignatureAlgorithm;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub subscription_id: Uuid,
    /// Matches the `<connector>` path segment of `POST /<connector>/webhook`.
    pub connector_slug: String,
    pub secret: String,
    #[serde(default)]
    pub algorithm: SubscriptionAlgorithm,
    /// The `signal_type` written onto the resulting `Signal` row.
    pub signal_type: String,
    /// Narrows unrouted-signal matching to executions of this workflow (§4.5); `None`
    /// matches across all workflows waiting on `signal_type`.
    pub workflow_id: Option<Uuid>,
    pub mapping: PayloadMapping,
}

/// Serde-friendly mirror of [`SignatureAlgorithm`] (kept separate so the crypto module
/// doesn't need to derive Serialize/Deserialize for a single enum variant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionAlgorithm {
    #[default]
    HmacSha256,
}

impl From<SubscriptionAlgorithm> for SignatureAlgorithm {
    fn from(algorithm: SubscriptionAlgorithm) -> Self {
        match algorithm {
            SubscriptionAlgorithm::HmacSha256 => SignatureAlgorithm::HmacSha256,
        }
    }
}
