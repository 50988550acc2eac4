//! Webhook ingress (§4.5): validates the incoming signature against each subscription
//! registered for the `trigger_id`, maps the payload through the subscription's declarative
//! mapping, and writes a `Signal` row per matching subscription.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use flowkeep_engine::model::Signal;
use flowkeep_engine::persistence::{ExecutionStore, StoreError};

use crate::mapping::map_payload;
use crate::registry::SubscriptionRegistry;
use crate::signature::{verify_signature, SignatureError};
use crate::subscription::Subscription;

#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    #[error("no subscriptions registered for trigger_id '{0}'")]
    UnknownTrigger(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Returned to the webhook caller: how many registered subscriptions the signature matched
/// and produced a signal for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressReceipt {
    pub matched_subscriptions: u32,
    pub signal_ids: Vec<Uuid>,
}

pub struct WebhookIngress {
    registry: Arc<dyn SubscriptionRegistry>,
    store: Arc<dyn ExecutionStore>,
}

impl WebhookIngress {
    pub fn new(registry: Arc<dyn SubscriptionRegistry>, store: Arc<dyn ExecutionStore>) -> Self {
        Self { registry, store }
    }

    /// `raw_body` is the exact bytes the signature was computed over — mapping must happen
    /// on a separately-parsed `Value` so signature verification never depends on
    /// re-serialization being byte-stable.
    pub async fn ingest(
        &self,
        trigger_id: &str,
        raw_body: &[u8],
        provided_signature: &str,
    ) -> Result<IngressReceipt, IngressError> {
        let subscriptions = self.registry.subscriptions_for(trigger_id).await;
        if subscriptions.is_empty() {
            return Err(IngressError::UnknownTrigger(trigger_id.to_string()));
        }

        let payload: serde_json::Value = serde_json::from_slice(raw_body).unwrap_or(serde_json::Value::Null);

        let mut signal_ids = Vec::new();
        for subscription in &subscriptions {
            match self.try_subscription(subscription, raw_body, provided_signature, &payload).await {
                Ok(signal_id) => signal_ids.push(signal_id),
                Err(SubscriptionOutcome::SignatureRejected(e)) => {
                    warn!(
                        subscription_id = %subscription.subscription_id,
                        error = %e,
                        "webhook signature rejected"
                    );
                }
                Err(SubscriptionOutcome::Store(e)) => {
                    warn!(
                        subscription_id = %subscription.subscription_id,
                        error = %e,
                        "failed to persist signal for subscription"
                    );
                }
            }
        }

        Ok(IngressReceipt {
            matched_subscriptions: signal_ids.len() as u32,
            signal_ids,
        })
    }

    async fn try_subscription(
        &self,
        subscription: &Subscription,
        raw_body: &[u8],
        provided_signature: &str,
        payload: &serde_json::Value,
    ) -> Result<Uuid, SubscriptionOutcome> {
        verify_signature(&subscription.secret, subscription.algorithm.into(), raw_body, provided_signature)
            .map_err(SubscriptionOutcome::SignatureRejected)?;

        let mapped = map_payload(&subscription.mapping, payload);
        let signal = Signal {
            signal_id: Uuid::now_v7(),
            signal_type: subscription.signal_type.clone(),
            execution_id: None,
            workflow_id: subscription.workflow_id,
            payload: mapped,
            received_at: Utc::now(),
            processed_at: None,
        };

        let signal_id = self
            .store
            .append_signal(signal)
            .await
            .map_err(SubscriptionOutcome::Store)?;
        info!(
            subscription_id = %subscription.subscription_id,
            signal_id = %signal_id,
            signal_type = %subscription.signal_type,
            "webhook signal accepted"
        );
        Ok(signal_id)
    }
}

enum SubscriptionOutcome {
    SignatureRejected(SignatureError),
    Store(StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemorySubscriptionRegistry;
    use crate::subscription::SubscriptionAlgorithm;
    use flowkeep_engine::persistence::InMemoryExecutionStore;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    use std::collections::BTreeMap;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    fn subscription(secret: &str) -> Subscription {
        let mut mapping = BTreeMap::new();
        mapping.insert("order_id".to_string(), "data.order.id".to_string());
        Subscription {
            subscription_id: Uuid::now_v7(),
            connector_slug: "stripe".into(),
            secret: secret.to_string(),
            algorithm: SubscriptionAlgorithm::HmacSha256,
            signal_type: "payment.succeeded".into(),
            workflow_id: None,
            mapping,
        }
    }

    #[tokio::test]
    async fn ingest_writes_a_mapped_signal_on_valid_signature() {
        let registry = Arc::new(InMemorySubscriptionRegistry::new());
        registry.register("trig_1", subscription("shh"));
        let store: Arc<dyn ExecutionStore> = Arc::new(InMemoryExecutionStore::new());
        let ingress = WebhookIngress::new(registry, store);

        let body = br#"{"data":{"order":{"id":"ord_1"}}}"#;
        let signature = sign("shh", body);

        let receipt = ingress.ingest("trig_1", body, &signature).await.unwrap();
        assert_eq!(receipt.matched_subscriptions, 1);
        assert_eq!(receipt.signal_ids.len(), 1);
    }

    #[tokio::test]
    async fn ingest_rejects_bad_signature_without_writing_a_signal() {
        let registry = Arc::new(InMemorySubscriptionRegistry::new());
        registry.register("trig_1", subscription("shh"));
        let store: Arc<dyn ExecutionStore> = Arc::new(InMemoryExecutionStore::new());
        let ingress = WebhookIngress::new(registry, store);

        let body = br#"{"data":{}}"#;
        let receipt = ingress.ingest("trig_1", body, "deadbeef").await.unwrap();
        assert_eq!(receipt.matched_subscriptions, 0);
    }

    #[tokio::test]
    async fn ingest_rejects_unknown_trigger() {
        let registry = Arc::new(InMemorySubscriptionRegistry::new());
        let store: Arc<dyn ExecutionStore> = Arc::new(InMemoryExecutionStore::new());
        let ingress = WebhookIngress::new(registry, store);

        let result = ingress.ingest("does-not-exist", b"{}", "sig").await;
        assert!(matches!(result, Err(IngressError::UnknownTrigger(_))));
    }

    #[tokio::test]
    async fn ingest_fans_out_to_multiple_subscriptions_on_the_same_trigger() {
        let registry = Arc::new(InMemorySubscriptionRegistry::new());
        registry.register("trig_1", subscription("secret-a"));
        registry.register("trig_1", subscription("secret-b"));
        let store: Arc<dyn ExecutionStore> = Arc::new(InMemoryExecutionStore::new());
        let ingress = WebhookIngress::new(registry, store);

        let body = br#"{"data":{"order":{"id":"ord_1"}}}"#;
        // Only the subscription keyed "secret-a" will verify against this signature.
        let signature = sign("secret-a", body);

        let receipt = ingress.ingest("trig_1", body, &signature).await.unwrap();
        assert_eq!(receipt.matched_subscriptions, 1);
    }
}
