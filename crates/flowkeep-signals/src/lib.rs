//! Webhook signal ingress (§4.5 "Signal & Schedule Layer" — signals half): signature
//! verification, subscription lookup, and dot-path payload mapping, producing `Signal`
//! rows through a `flowkeep_engine::persistence::ExecutionStore`. The HTTP transport that
//! receives `POST /<connector>/webhook` and calls [`ingress::WebhookIngress::ingest`] lives
//! in the `flowkeep-api` crate; this crate only holds the ingress logic itself.

pub mod ingress;
pub mod mapping;
pub mod registry;
pub mod signature;
pub mod subscription;

pub use ingress::{IngressError, IngressReceipt, WebhookIngress};
pub use mapping::{map_payload, PayloadMapping};
pub use registry::{InMemorySubscriptionRegistry, SubscriptionRegistry};
pub use signature::{verify_signature, SignatureAlgorithm, SignatureError};
pub use subscription::{Subscription, SubscriptionAlgorithm};
