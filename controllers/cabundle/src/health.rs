//! File-based liveness.
//!
//! A running controller can rewrite a heartbeat file on a fixed interval; the
//! `probe` subcommand, run by the kubelet inside the same container, checks that
//! the file was modified recently enough.

use crate::error::ControllerError;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where and how often the heartbeat file is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// File rewritten on every beat
    pub path: PathBuf,
    /// Time between two writes
    pub interval: Duration,
}

/// What `probe` checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOptions {
    /// File expected to be kept fresh by a running controller
    pub path: PathBuf,
    /// Maximum accepted age of the file
    pub update_interval: Duration,
}

impl ProbeOptions {
    /// A probe needs a path and a non-zero interval.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.path.as_os_str().is_empty() && !self.update_interval.is_zero()
    }
}

/// Succeeds iff the probe file exists and was modified within `update_interval`.
pub fn check_status(options: &ProbeOptions) -> Result<(), ControllerError> {
    if !options.is_valid() {
        return Err(ControllerError::InvalidConfig(
            "probe requires --probe-path and a non-zero --interval".to_string(),
        ));
    }

    let path = options.path.display();
    let metadata = std::fs::metadata(&options.path)
        .map_err(|e| ControllerError::Health(format!("fail on inspecting path {path}: {e}")))?;
    let modified = metadata
        .modified()
        .map_err(|e| ControllerError::Health(format!("fail on inspecting path {path}: {e}")))?;

    // A modification time in the future counts as fresh.
    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO);

    if age > options.update_interval {
        return Err(ControllerError::Health(format!(
            "fail on inspecting path {path}: last update {} ago exceeds {}",
            humantime::format_duration(truncate_to_millis(age)),
            humantime::format_duration(options.update_interval),
        )));
    }

    Ok(())
}

fn truncate_to_millis(d: Duration) -> Duration {
    Duration::from_millis(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

fn beat(path: &Path) {
    let stamp = chrono::Utc::now().to_rfc3339();
    if let Err(e) = std::fs::write(path, stamp) {
        warn!(path = %path.display(), error = %e, "Failed to update health check file");
    }
}

/// Rewrite the heartbeat file until `cancel` fires, then remove it.
pub async fn run_heartbeat(config: HeartbeatConfig, cancel: CancellationToken) {
    info!(
        path = %config.path.display(),
        interval = ?config.interval,
        "Health check file heartbeat started"
    );

    let mut ticker = time::interval(config.interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => beat(&config.path),
        }
    }

    // A stopped controller must not look alive to the next probe.
    match std::fs::remove_file(&config.path) {
        Ok(()) => debug!(path = %config.path.display(), "Removed health check file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            path = %config.path.display(),
            error = %e,
            "Failed to remove health check file"
        ),
    }
}
