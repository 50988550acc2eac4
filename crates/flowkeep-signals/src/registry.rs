//! Subscription lookup: which subscriptions are registered against a given `trigger_id`
//! (the webhook path's routing key). Kept behind a trait so a persisted implementation can
//! replace the in-memory one without touching the ingress logic.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use crate::subscription::Subscription;

#[async_trait]
pub trait SubscriptionRegistry: Send + Sync + 'static {
    /// All subscriptions registered under `trigger_id`. A `trigger_id` may have more than
    /// one subscription (e.g. several workflows listening on the same connector trigger).
    async fn subscriptions_for(&self, trigger_id: &str) -> Vec<Subscription>;
}

/// Process-local subscription registry, suitable for tests and single-process deployments.
#[derive(Default)]
pub struct InMemorySubscriptionRegistry {
    by_trigger: RwLock<HashMap<String, Vec<Subscription>>>,
}

impl InMemorySubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, trigger_id: impl Into<String>, subscription: Subscription) {
        self.by_trigger
            .write()
            .unwrap()
            .entry(trigger_id.into())
            .or_default()
            .push(subscription);
    }

    pub fn remove(&self, trigger_id: &str, subscription_id: Uuid) {
        if let Some(subs) = self.by_trigger.write().unwrap().get_mut(trigger_id) {
            subs.retain(|s| s.subscription_id != subscription_id);
        }
    }
}

#[async_trait]
impl SubscriptionRegistry for InMemorySubscriptionRegistry {
    async fn subscriptions_for(&self, trigger_id: &str) -> Vec<Subscription> {
        self.by_trigger
            .read()
            .unwrap()
            .get(trigger_id)
            .cloned()
            .unwrap_or_default()
    }
}
