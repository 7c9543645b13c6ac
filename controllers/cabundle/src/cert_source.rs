//! Local copy of the CA certificate bundle.
//!
//! `CertSource` owns the last good bytes read from the certificate file. The bytes
//! are opaque: they are never parsed, only copied verbatim into the webhook
//! configuration.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors reading the certificate file.
#[derive(Debug, Error)]
pub enum CertSourceError {
    /// The file could not be read (missing, unreadable, permission denied)
    #[error("failed to read CA bundle {}: {source}", path.display())]
    Read {
        /// Path that was read
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// The file exists but holds no bytes (e.g. truncated mid-rewrite)
    #[error("CA bundle {} is empty", path.display())]
    Empty {
        /// Path that was read
        path: PathBuf,
    },
}

/// PEM-encoded certificate chain, treated as an opaque blob.
///
/// Cloning is cheap; the bytes are shared and never mutated in place.
#[derive(Clone, PartialEq, Eq)]
pub struct CertificateBundle(Arc<[u8]>);

impl CertificateBundle {
    /// Raw bytes of the bundle
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<u8>> for CertificateBundle {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }
}

// PEM bodies are noise in logs; only the size is useful.
impl fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CertificateBundle({} bytes)", self.0.len())
    }
}

/// Cached certificate bundle backed by a file on disk.
#[derive(Debug)]
pub struct CertSource {
    path: PathBuf,
    bundle: CertificateBundle,
}

impl CertSource {
    /// Read `path` synchronously and cache its contents.
    ///
    /// Fails if the file cannot be read or is empty; the cache is never empty once
    /// constructed.
    pub fn initialize(path: impl Into<PathBuf>) -> Result<Self, CertSourceError> {
        let path = path.into();
        let bundle = read_bundle(&path)?;
        Ok(Self { path, bundle })
    }

    /// Re-read the file and replace the cached bundle.
    ///
    /// On failure the previous bundle is kept and the error is returned to the
    /// caller for logging.
    pub fn refresh(&mut self) -> Result<&CertificateBundle, CertSourceError> {
        self.bundle = read_bundle(&self.path)?;
        Ok(&self.bundle)
    }

    /// The cached bundle.
    #[must_use]
    pub fn current(&self) -> &CertificateBundle {
        &self.bundle
    }

    /// Path of the certificate file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_bundle(path: &Path) -> Result<CertificateBundle, CertSourceError> {
    let bytes = std::fs::read(path).map_err(|source| CertSourceError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    if bytes.is_empty() {
        return Err(CertSourceError::Empty {
            path: path.to_path_buf(),
        });
    }

    Ok(CertificateBundle::from(bytes))
}
