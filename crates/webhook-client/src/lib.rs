//! Admission Webhook Configuration Client
//!
//! A small client for the one operation the CA bundle controller needs from the
//! Kubernetes API: overwriting the `caBundle` of a single webhook entry inside a
//! `MutatingWebhookConfiguration` or `ValidatingWebhookConfiguration`.
//!
//! # Example
//!
//! ```no_run
//! use webhook_client::{WebhookClient, WebhookClientTrait, WebhookKind, WebhookTarget};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = WebhookClient::try_default().await?;
//! let target = WebhookTarget::new(
//!     WebhookKind::Mutating,
//!     "istio-sidecar-injector",
//!     "sidecar-injector.istio.io",
//! );
//!
//! let pem = std::fs::read("/etc/istio/certs/root-cert.pem")?;
//! client.patch_ca_bundle(&target, &pem).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Write-only patching**: a strategic merge patch keyed by webhook name; the
//!   configuration is never read first
//! - **Mocking**: `MockWebhookClient` behind the `test-util` feature

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod webhook_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::WebhookClient;
pub use error::WebhookClientError;
pub use models::*;
pub use webhook_trait::WebhookClientTrait;
#[cfg(feature = "test-util")]
pub use mock::{MockWebhookClient, RecordedPatch};
