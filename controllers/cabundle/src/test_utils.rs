//! Test utilities for unit testing the reconciler
//!
//! This module provides helpers for creating certificate files and reconciler
//! configurations, and for capturing log output.

#[cfg(test)]
use crate::reconciler::ReconcilerConfig;
#[cfg(test)]
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::time::Duration;
#[cfg(test)]
use webhook_client::{WebhookKind, WebhookTarget};

/// Write `contents` to `dir/name`, replacing any existing file
#[cfg(test)]
pub fn write_cert(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("failed to write test certificate");
    path
}

/// Replace `dir/name` the way Secret volumes and rotation tools do: write a
/// sibling file, then rename it over the target
#[cfg(test)]
pub fn rotate_cert_atomically(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let staging = dir.join(format!(".{name}.tmp"));
    std::fs::write(&staging, contents).expect("failed to write staging certificate");
    let path = dir.join(name);
    std::fs::rename(&staging, &path).expect("failed to rename staging certificate");
    path
}

/// Target used by all reconciler tests
#[cfg(test)]
pub fn test_target() -> WebhookTarget {
    WebhookTarget::new(
        WebhookKind::Mutating,
        "istio-sidecar-injector",
        "sidecar-injector.istio.io",
    )
}

/// Reconciler configuration for `ca_cert_file` with the given interval
#[cfg(test)]
pub fn test_config(ca_cert_file: PathBuf, interval: Duration) -> ReconcilerConfig {
    ReconcilerConfig {
        ca_cert_file,
        target: test_target(),
        interval,
    }
}

/// Output of a test-local tracing subscriber, as plain text lines
#[cfg(test)]
#[derive(Clone, Default)]
pub struct CapturedLogs {
    output: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
}

#[cfg(test)]
impl CapturedLogs {
    /// Subscriber writing every event at DEBUG and above into this buffer
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + 'static {
        tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish()
    }

    /// Captured lines containing `needle`
    pub fn lines_containing(&self, needle: &str) -> Vec<String> {
        let output = self.output.lock().expect("log buffer poisoned");
        String::from_utf8_lossy(&output)
            .lines()
            .filter(|line| line.contains(needle))
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CapturedLogWriter {
            output: self.output.clone(),
        }
    }
}

/// Writer handed out by `CapturedLogs`
#[cfg(test)]
pub struct CapturedLogWriter {
    output: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
}

#[cfg(test)]
impl std::io::Write for CapturedLogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.output
            .lock()
            .expect("log buffer poisoned")
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
