//! Kubernetes implementation of the webhook client

use crate::error::WebhookClientError;
use crate::models::{WebhookKind, WebhookTarget, ca_bundle_patch};
use crate::webhook_trait::WebhookClientTrait;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use kube::api::{Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use std::path::Path;
use tracing::debug;

/// Field manager recorded on every patch.
pub const FIELD_MANAGER: &str = "cabundle-controller";

/// Admission registration API client
#[derive(Clone)]
pub struct WebhookClient {
    client: Client,
}

impl std::fmt::Debug for WebhookClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookClient")
            .field("default_namespace", &self.client.default_namespace())
            .finish()
    }
}

impl WebhookClient {
    /// Wrap an existing Kubernetes client
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the in-cluster service account or the default kubeconfig
    pub async fn try_default() -> Result<Self, WebhookClientError> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }

    /// Build a client from an explicit kubeconfig file
    pub async fn from_kubeconfig(path: &Path) -> Result<Self, WebhookClientError> {
        let kubeconfig = Kubeconfig::read_from(path)?;
        let config =
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
        let client = Client::try_from(config)?;
        Ok(Self::new(client))
    }

    fn patch_params() -> PatchParams {
        PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl WebhookClientTrait for WebhookClient {
    async fn patch_ca_bundle(
        &self,
        target: &WebhookTarget,
        ca_bundle: &[u8],
    ) -> Result<(), WebhookClientError> {
        let body = ca_bundle_patch(&target.webhook_name, ca_bundle);
        let patch = Patch::Strategic(&body);
        let params = Self::patch_params();

        match target.kind {
            WebhookKind::Mutating => {
                let api: Api<MutatingWebhookConfiguration> = Api::all(self.client.clone());
                api.patch(&target.config_name, &params, &patch).await?;
            }
            WebhookKind::Validating => {
                let api: Api<ValidatingWebhookConfiguration> = Api::all(self.client.clone());
                api.patch(&target.config_name, &params, &patch).await?;
            }
        }

        debug!(webhook = %target, bytes = ca_bundle.len(), "Patched caBundle");
        Ok(())
    }
}
