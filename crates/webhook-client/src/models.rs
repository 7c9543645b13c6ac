//! Target identity and patch body for admission webhook configurations

use crate::error::WebhookClientError;
use k8s_openapi::ByteString;
use serde_json::{Value, json};
use std::fmt;
use std::str::FromStr;

/// Which admission registration resource holds the webhook entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WebhookKind {
    /// `admissionregistration.k8s.io/v1` `MutatingWebhookConfiguration`
    #[default]
    Mutating,
    /// `admissionregistration.k8s.io/v1` `ValidatingWebhookConfiguration`
    Validating,
}

impl WebhookKind {
    /// Kubernetes kind name of the configuration resource.
    #[must_use]
    pub fn resource_kind(self) -> &'static str {
        match self {
            WebhookKind::Mutating => "MutatingWebhookConfiguration",
            WebhookKind::Validating => "ValidatingWebhookConfiguration",
        }
    }
}

impl fmt::Display for WebhookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebhookKind::Mutating => f.write_str("mutating"),
            WebhookKind::Validating => f.write_str("validating"),
        }
    }
}

impl FromStr for WebhookKind {
    type Err = WebhookClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mutating" | "mutatingwebhookconfiguration" => Ok(WebhookKind::Mutating),
            "validating" | "validatingwebhookconfiguration" => Ok(WebhookKind::Validating),
            other => Err(WebhookClientError::InvalidKind(other.to_string())),
        }
    }
}

/// Identity of one webhook entry inside a cluster-scoped configuration resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WebhookTarget {
    /// Configuration resource kind
    pub kind: WebhookKind,
    /// Name of the configuration resource
    pub config_name: String,
    /// Name of the webhook entry in `.webhooks[]`
    pub webhook_name: String,
}

impl WebhookTarget {
    /// Create a target for `webhook_name` inside the configuration `config_name`.
    pub fn new(
        kind: WebhookKind,
        config_name: impl Into<String>,
        webhook_name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            config_name: config_name.into(),
            webhook_name: webhook_name.into(),
        }
    }
}

impl fmt::Display for WebhookTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} (webhook {})",
            self.kind.resource_kind(),
            self.config_name,
            self.webhook_name
        )
    }
}

/// Build the strategic merge patch that overwrites one entry's `caBundle`.
///
/// `webhooks` merges on `name`, so only the named entry's `clientConfig.caBundle`
/// changes. `ByteString` serializes the raw bytes as base64, which is what the
/// API server stores.
#[must_use]
pub fn ca_bundle_patch(webhook_name: &str, ca_bundle: &[u8]) -> Value {
    json!({
        "webhooks": [{
            "name": webhook_name,
            "clientConfig": {
                "caBundle": ByteString(ca_bundle.to_vec()),
            },
        }],
    })
}
