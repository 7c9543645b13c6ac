//! WebhookClient trait for mocking
//!
//! This trait abstracts the WebhookClient to enable mocking in unit tests.
//! The concrete WebhookClient implements this trait, and tests can use mock implementations.

use crate::error::WebhookClientError;
use crate::models::WebhookTarget;

/// Trait for admission webhook configuration operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait WebhookClientTrait: Send + Sync {
    /// Overwrite the `caBundle` of `target` with the raw PEM bytes in `ca_bundle`.
    ///
    /// The current value is never read first. Reapplying the same bytes is a no-op
    /// on the server side.
    async fn patch_ca_bundle(
        &self,
        target: &WebhookTarget,
        ca_bundle: &[u8],
    ) -> Result<(), WebhookClientError>;
}
