//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the CA bundle reconciler
//! to the cluster, starts the optional health heartbeat, and handles process
//! signals:
//! - SIGINT / SIGTERM: cancel all tasks and wait for them
//! - SIGHUP: ask the reconciler to re-read the certificate file

use crate::config::RunArgs;
use crate::error::ControllerError;
use crate::health::{self, HeartbeatConfig};
use crate::reconciler::{Reconciler, ReconcilerHandle};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use webhook_client::WebhookClient;

/// Main controller for CA bundle management.
#[derive(Debug)]
pub struct Controller {
    handle: ReconcilerHandle,
    reconciler: JoinHandle<()>,
    heartbeat: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Controller {
    /// Creates a new controller instance and starts its background tasks.
    ///
    /// Fails if the cluster client cannot be built, the certificate cannot be
    /// read, or the certificate directory cannot be watched.
    pub async fn new(args: RunArgs) -> Result<Self, ControllerError> {
        info!("Initializing CA Bundle Controller");

        // kube is built with rustls but no default provider
        if rustls::crypto::ring::default_provider().install_default().is_err() {
            debug!("rustls crypto provider already installed");
        }

        let config = args.reconciler_config()?;
        info!("Configuration:");
        info!("  CA certificate file: {}", config.ca_cert_file.display());
        info!("  Webhook: {}", config.target);
        info!("  Reconcile interval: {}", humantime::format_duration(config.interval));

        let client = match &args.kubeconfig {
            Some(path) => {
                info!("  Kubeconfig: {}", path.display());
                WebhookClient::from_kubeconfig(path).await?
            }
            None => WebhookClient::try_default().await?,
        };

        let reconciler = Reconciler::new(config, Box::new(client))?;

        let cancel = CancellationToken::new();
        let (handle, reconciler) = reconciler.spawn(cancel.child_token());
        info!(bytes = handle.current().len(), "Initial CA bundle loaded");

        Ok(Self::start(handle, reconciler, args.heartbeat(), cancel))
    }

    /// Takes over a spawned reconciler and starts the heartbeat, if configured,
    /// under `cancel`.
    fn start(
        handle: ReconcilerHandle,
        reconciler: JoinHandle<()>,
        heartbeat: Option<HeartbeatConfig>,
        cancel: CancellationToken,
    ) -> Self {
        let heartbeat = heartbeat.map(|heartbeat| {
            let cancel = cancel.child_token();
            tokio::spawn(health::run_heartbeat(heartbeat, cancel))
        });

        Self {
            handle,
            reconciler,
            heartbeat,
            cancel,
        }
    }

    /// Runs the controller until a shutdown signal arrives.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("CA Bundle Controller running");

        let mut signals = Signals::new()?;
        loop {
            tokio::select! {
                signal = signals.next() => match signal {
                    Signal::Shutdown(name) => {
                        info!("Received {}, shutting down", name);
                        break;
                    }
                    Signal::Reload => {
                        info!("Received SIGHUP, refreshing CA bundle");
                        if let Err(e) = self.handle.request_refresh().await {
                            error!("Failed to request refresh: {}", e);
                        }
                    }
                },
                result = &mut self.reconciler => {
                    // The reconciler only returns when cancelled, which has not happened yet.
                    self.cancel.cancel();
                    stop_heartbeat(self.heartbeat.take()).await?;
                    let reason = match result {
                        Ok(()) => "reconciler exited unexpectedly".to_string(),
                        Err(e) => format!("reconciler panicked: {e}"),
                    };
                    return Err(ControllerError::TaskFailed(reason));
                }
            }
        }

        self.shutdown().await
    }

    async fn shutdown(mut self) -> Result<(), ControllerError> {
        self.cancel.cancel();

        (&mut self.reconciler)
            .await
            .map_err(|e| ControllerError::TaskFailed(format!("reconciler panicked: {e}")))?;
        stop_heartbeat(self.heartbeat.take()).await?;

        info!("CA Bundle Controller stopped");
        Ok(())
    }
}

/// Waits for the heartbeat task, which removes its file once cancelled.
async fn stop_heartbeat(heartbeat: Option<JoinHandle<()>>) -> Result<(), ControllerError> {
    if let Some(heartbeat) = heartbeat {
        heartbeat
            .await
            .map_err(|e| ControllerError::TaskFailed(format!("heartbeat panicked: {e}")))?;
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Signal {
    Shutdown(&'static str),
    Reload,
}

// Streams are created once, so a signal arriving while the previous one is
// being handled stays queued.
#[cfg(unix)]
struct Signals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn new() -> Result<Self, ControllerError> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    async fn next(&mut self) -> Signal {
        tokio::select! {
            _ = self.interrupt.recv() => Signal::Shutdown("SIGINT"),
            _ = self.terminate.recv() => Signal::Shutdown("SIGTERM"),
            _ = self.hangup.recv() => Signal::Reload,
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn new() -> Result<Self, ControllerError> {
        Ok(Self)
    }

    async fn next(&mut self) -> Signal {
        let _ = tokio::signal::ctrl_c().await;
        Signal::Shutdown("Ctrl-C")
    }
}
