//! Command-line and environment configuration.
//!
//! Every flag can also be set through an environment variable. Values are read
//! once at startup and never change afterwards.

use crate::error::ControllerError;
use crate::health::{HeartbeatConfig, ProbeOptions};
use crate::reconciler::ReconcilerConfig;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use webhook_client::{WebhookKind, WebhookTarget};

/// Keeps the caBundle of an admission webhook configuration in sync with a certificate file.
#[derive(Debug, Parser)]
#[command(name = "cabundle-controller", version, about, args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// Logging options
    #[command(flatten)]
    pub logging: LoggingArgs,

    /// Subcommand; `run` when omitted
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Options for the default `run` subcommand
    #[command(flatten)]
    pub run: RunArgs,
}

/// Subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the CA bundle reconciler until SIGINT/SIGTERM
    Run(RunArgs),
    /// Check the liveness or readiness of a locally-running controller
    Probe(ProbeArgs),
    /// Print version information
    Version,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Logging options
#[derive(Debug, Args)]
pub struct LoggingArgs {
    /// Log output format. Filtering is controlled by RUST_LOG (default `info`).
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,
}

/// Options for `run`
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// File containing the CA certificate bundle to publish
    #[arg(long, env = "CA_CERT_FILE", default_value = "/etc/istio/certs/root-cert.pem")]
    pub ca_cert_file: PathBuf,

    /// Name of the webhook configuration resource
    #[arg(long, env = "WEBHOOK_CONFIG_NAME", default_value = "istio-sidecar-injector")]
    pub webhook_config_name: String,

    /// Name of the webhook entry in the webhook configuration
    #[arg(long, env = "WEBHOOK_NAME", default_value = "sidecar-injector.istio.io")]
    pub webhook_name: String,

    /// Kind of webhook configuration: `mutating` or `validating`
    #[arg(long, env = "WEBHOOK_KIND", default_value = "mutating")]
    pub webhook_kind: WebhookKind,

    /// How often the caBundle is reasserted
    #[arg(
        long,
        env = "RECONCILE_INTERVAL",
        default_value = "1s",
        value_parser = humantime::parse_duration
    )]
    pub reconcile_interval: Duration,

    /// Path to a kubeconfig file. In-cluster configuration is used when unset.
    #[arg(long, env = "KUBECONFIG_FILE")]
    pub kubeconfig: Option<PathBuf>,

    /// File that is periodically updated while the controller is healthy
    #[arg(long, env = "HEALTH_CHECK_FILE")]
    pub health_check_file: Option<PathBuf>,

    /// How often the health check file is updated; 0 disables it
    #[arg(
        long,
        env = "HEALTH_CHECK_INTERVAL",
        default_value = "0s",
        value_parser = humantime::parse_duration
    )]
    pub health_check_interval: Duration,
}

impl RunArgs {
    /// Target webhook entry
    #[must_use]
    pub fn target(&self) -> WebhookTarget {
        WebhookTarget::new(
            self.webhook_kind,
            self.webhook_config_name.clone(),
            self.webhook_name.clone(),
        )
    }

    /// Reconciler settings, validated
    pub fn reconciler_config(&self) -> Result<ReconcilerConfig, ControllerError> {
        if self.reconcile_interval.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "--reconcile-interval must be greater than zero".to_string(),
            ));
        }
        if self.webhook_config_name.trim().is_empty() {
            return Err(ControllerError::InvalidConfig(
                "--webhook-config-name must not be empty".to_string(),
            ));
        }
        if self.webhook_name.trim().is_empty() {
            return Err(ControllerError::InvalidConfig(
                "--webhook-name must not be empty".to_string(),
            ));
        }

        Ok(ReconcilerConfig {
            ca_cert_file: self.ca_cert_file.clone(),
            target: self.target(),
            interval: self.reconcile_interval,
        })
    }

    /// Heartbeat settings, if health checking is enabled
    #[must_use]
    pub fn heartbeat(&self) -> Option<HeartbeatConfig> {
        match &self.health_check_file {
            Some(path) if !self.health_check_interval.is_zero() => Some(HeartbeatConfig {
                path: path.clone(),
                interval: self.health_check_interval,
            }),
            _ => None,
        }
    }
}

/// Options for `probe`
#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Path of the file for checking the availability
    #[arg(long)]
    pub probe_path: PathBuf,

    /// Maximum age of the file's last modification
    #[arg(long, value_parser = humantime::parse_duration)]
    pub interval: Duration,
}

impl ProbeArgs {
    /// Probe settings
    #[must_use]
    pub fn options(&self) -> ProbeOptions {
        ProbeOptions {
            path: self.probe_path.clone(),
            update_interval: self.interval,
        }
    }
}
