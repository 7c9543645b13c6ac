//! Filesystem watch on the certificate's directory.
//!
//! The watch is registered on the containing directory rather than the file: an
//! atomic rename over the file (how Secret volumes and most rotation tools update
//! certificates) drops a watch placed on the file itself.
//!
//! `notify` delivers events on its own thread; they are forwarded into the
//! reconciler's tokio channel as `RefreshTrigger`s.

use crate::error::ControllerError;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

/// Why the reconciler should re-read the certificate file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshTrigger {
    /// Something changed in the watched directory
    Filesystem {
        /// Paths reported by the event (may not include the certificate itself)
        paths: Vec<PathBuf>,
    },
    /// Explicit request through a `ReconcilerHandle`
    Requested,
}

/// Keeps the directory watch alive. Dropping it stops notifications.
pub struct CertDirWatcher {
    dir: PathBuf,
    _watcher: RecommendedWatcher,
}

impl std::fmt::Debug for CertDirWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertDirWatcher").field("dir", &self.dir).finish()
    }
}

impl CertDirWatcher {
    /// Directory being watched
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Directory to watch for `cert_path`. A bare file name resolves to the working directory.
#[must_use]
pub fn watch_dir_for(cert_path: &Path) -> PathBuf {
    match cert_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Reads (open, access, close-without-write) are not changes. Our own refresh
/// reads would otherwise feed back into the loop.
fn is_change(kind: &EventKind) -> bool {
    !matches!(kind, EventKind::Access(_))
}

/// Watch the directory containing `cert_path`, sending a trigger on every change.
///
/// Fails if the watch cannot be registered (directory missing, inotify limits).
pub fn watch_parent_dir(
    cert_path: &Path,
    triggers: mpsc::Sender<RefreshTrigger>,
) -> Result<CertDirWatcher, ControllerError> {
    let dir = watch_dir_for(cert_path);

    let handler = move |result: notify::Result<Event>| match result {
        Ok(event) if is_change(&event.kind) => {
            match triggers.try_send(RefreshTrigger::Filesystem { paths: event.paths }) {
                // A full queue already guarantees a pending refresh, which reads the latest file.
                Ok(()) | Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Closed(_)) => {
                    debug!("Reconciler stopped, dropping filesystem event");
                }
            }
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Filesystem watch error"),
    };

    let mut watcher = notify::recommended_watcher(handler).map_err(|source| ControllerError::Watch {
        path: dir.clone(),
        source,
    })?;
    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .map_err(|source| ControllerError::Watch {
            path: dir.clone(),
            source,
        })?;

    info!(dir = %dir.display(), "Watching certificate directory");

    Ok(CertDirWatcher {
        dir,
        _watcher: watcher,
    })
}
