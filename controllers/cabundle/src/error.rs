//! Controller-specific error types.
//!
//! Only startup errors are ever returned to `main`. Failures inside the running
//! reconciliation loop are logged and retried, never propagated.

use crate::cert_source::CertSourceError;
use std::path::PathBuf;
use thiserror::Error;
use webhook_client::WebhookClientError;

/// Errors that can occur in the CA Bundle Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Cluster client could not be built
    #[error("Webhook client error: {0}")]
    WebhookClient(#[from] WebhookClientError),

    /// Initial certificate read failed
    #[error("Certificate error: {0}")]
    CertSource(#[from] CertSourceError),

    /// Filesystem watch could not be registered
    #[error("Could not watch {}: {source}", path.display())]
    Watch {
        /// Directory that was to be watched
        path: PathBuf,
        /// Underlying notify error
        #[source]
        source: notify::Error,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Health probe failed
    #[error("Health check failed: {0}")]
    Health(String),

    /// Signal handler or other OS-level IO failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A background task stopped unexpectedly
    #[error("Task failed: {0}")]
    TaskFailed(String),
}
