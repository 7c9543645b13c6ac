//! CA bundle reconciliation loop.
//!
//! A single task owns the cached certificate and is the only caller of the patch
//! operation. It waits on three sources at once:
//! - a fixed-interval timer: reassert the cached bundle on the webhook configuration
//! - refresh triggers (filesystem events, explicit requests): re-read the file
//! - a cancellation token: stop
//!
//! Refreshes never patch. A burst of filesystem events therefore costs at most one
//! write per interval, and a rotated certificate reaches the cluster on the next
//! tick. Patch failures are logged and retried on the next tick, forever.

use crate::cert_source::{CertSource, CertificateBundle};
use crate::error::ControllerError;
use crate::watcher::{self, CertDirWatcher, RefreshTrigger};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use webhook_client::{WebhookClientTrait, WebhookTarget};

pub(crate) const TRIGGER_QUEUE_DEPTH: usize = 64;

/// Everything the reconciler needs, fixed for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Certificate file to mirror
    pub ca_cert_file: PathBuf,
    /// Webhook entry whose `caBundle` is kept in sync
    pub target: WebhookTarget,
    /// Time between two patches
    pub interval: Duration,
}

/// State touched by each loop iteration. Only the reconciler task holds it.
struct ReconcilerState {
    client: Box<dyn WebhookClientTrait>,
    cert_source: CertSource,
    target: WebhookTarget,
    published: watch::Sender<CertificateBundle>,
}

impl ReconcilerState {
    async fn reassert(&self) {
        let bundle = self.cert_source.current();

        match self.client.patch_ca_bundle(&self.target, bundle.as_bytes()).await {
            Ok(()) => debug!(webhook = %self.target, bytes = bundle.len(), "caBundle reasserted"),
            Err(e) => error!(
                config = %self.target.config_name,
                webhook = %self.target.webhook_name,
                path = %self.cert_source.path().display(),
                error = %e,
                "Patch webhook failed"
            ),
        }
    }

    fn refresh(&mut self, trigger: &RefreshTrigger) {
        if let RefreshTrigger::Filesystem { paths } = trigger {
            debug!(?paths, "Change in certificate directory");
        }

        let previous = self.cert_source.current().clone();

        match self.cert_source.refresh().cloned() {
            Ok(bundle) => {
                if bundle != previous {
                    info!(
                        path = %self.cert_source.path().display(),
                        bytes = bundle.len(),
                        "CA bundle changed on disk"
                    );
                } else {
                    debug!(bytes = bundle.len(), "CA bundle unchanged");
                }
                self.published.send_replace(bundle);
            }
            Err(e) => error!(
                config = %self.target.config_name,
                webhook = %self.target.webhook_name,
                path = %self.cert_source.path().display(),
                ?trigger,
                error = %e,
                "CA bundle file read error"
            ),
        }
    }
}

/// Reconciles one webhook entry's `caBundle` against a certificate file.
pub struct Reconciler {
    state: ReconcilerState,
    interval: Duration,
    triggers_tx: mpsc::Sender<RefreshTrigger>,
    triggers: mpsc::Receiver<RefreshTrigger>,
    watcher: Option<CertDirWatcher>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("target", &self.state.target)
            .field("path", &self.state.cert_source.path())
            .field("interval", &self.interval)
            .field("watch_dir", &self.watcher.as_ref().map(CertDirWatcher::dir))
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Read the certificate and register the directory watch.
    ///
    /// Both steps are fatal: an unreadable certificate or a failed watch
    /// registration is returned to the caller and nothing is started.
    pub fn new(
        config: ReconcilerConfig,
        client: Box<dyn WebhookClientTrait>,
    ) -> Result<Self, ControllerError> {
        let mut reconciler = Self::unwatched(config, client)?;
        let watcher = watcher::watch_parent_dir(
            reconciler.state.cert_source.path(),
            reconciler.triggers_tx.clone(),
        )?;
        reconciler.watcher = Some(watcher);
        Ok(reconciler)
    }

    /// Same as `new` without the filesystem watch; refreshes only happen on request.
    pub(crate) fn unwatched(
        config: ReconcilerConfig,
        client: Box<dyn WebhookClientTrait>,
    ) -> Result<Self, ControllerError> {
        if config.interval.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "reconcile interval must be greater than zero".to_string(),
            ));
        }

        let cert_source = CertSource::initialize(config.ca_cert_file)?;
        let (published, _) = watch::channel(cert_source.current().clone());
        let (triggers_tx, triggers) = mpsc::channel(TRIGGER_QUEUE_DEPTH);

        Ok(Self {
            state: ReconcilerState {
                client,
                cert_source,
                target: config.target,
                published,
            },
            interval: config.interval,
            triggers_tx,
            triggers,
            watcher: None,
        })
    }

    /// Handle for reading the cached bundle and requesting refreshes.
    #[must_use]
    pub fn handle(&self) -> ReconcilerHandle {
        ReconcilerHandle {
            triggers: self.triggers_tx.clone(),
            bundle: self.state.published.subscribe(),
        }
    }

    /// Run the loop on its own task.
    pub fn spawn(self, cancel: CancellationToken) -> (ReconcilerHandle, JoinHandle<()>) {
        let handle = self.handle();
        let task = tokio::spawn(self.run(cancel));
        (handle, task)
    }

    /// Run until `cancel` fires. The first patch happens one interval after start.
    pub async fn run(self, cancel: CancellationToken) {
        let Reconciler {
            mut state,
            interval,
            triggers_tx,
            mut triggers,
            watcher,
        } = self;
        // Handles and the directory watch keep the channel open.
        drop(triggers_tx);
        let _watcher = watcher;

        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            webhook = %state.target,
            path = %state.cert_source.path().display(),
            interval = ?interval,
            "CA bundle reconciler started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!(webhook = %state.target, "CA bundle reconciler stopping");
                    break;
                }
                _ = ticker.tick() => state.reassert().await,
                Some(trigger) = triggers.recv() => state.refresh(&trigger),
            }
        }
    }
}

/// Cloneable access to a running reconciler.
///
/// The cached bundle itself stays inside the reconciler task; the handle sees a
/// published copy and can only ask for a refresh.
#[derive(Debug, Clone)]
pub struct ReconcilerHandle {
    triggers: mpsc::Sender<RefreshTrigger>,
    bundle: watch::Receiver<CertificateBundle>,
}

impl ReconcilerHandle {
    /// Bundle as of the last successful read.
    #[must_use]
    pub fn current(&self) -> CertificateBundle {
        self.bundle.borrow().clone()
    }

    /// Ask the reconciler to re-read the certificate file.
    ///
    /// Like a filesystem event, this does not patch by itself.
    pub async fn request_refresh(&self) -> Result<(), ControllerError> {
        self.triggers
            .send(RefreshTrigger::Requested)
            .await
            .map_err(|_closed| ControllerError::TaskFailed("reconciler is not running".to_string()))
    }
}
