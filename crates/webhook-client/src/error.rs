//! Webhook client errors

use thiserror::Error;

/// Errors that can occur when talking to the admission registration API
#[derive(Debug, Error)]
pub enum WebhookClientError {
    /// Kubernetes API error (network, authorization, not found, conflict)
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Kubeconfig could not be loaded
    #[error("Kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    /// Unknown webhook configuration kind
    #[error("Invalid webhook kind: {0} (expected `mutating` or `validating`)")]
    InvalidKind(String),

    /// Simulated failure from the mock client
    #[cfg(feature = "test-util")]
    #[error("Mock failure: {0}")]
    Mock(String),
}
