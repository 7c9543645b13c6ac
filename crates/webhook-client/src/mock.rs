//! Mock WebhookClient for unit testing
//!
//! This module provides a mock implementation of WebhookClientTrait that can be used
//! in unit tests without requiring a running cluster. It records every patch attempt
//! and keeps an in-memory copy of each target's `caBundle` so tests can simulate
//! external overwrites.

use crate::error::WebhookClientError;
use crate::models::WebhookTarget;
use crate::webhook_trait::WebhookClientTrait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

/// One call to `patch_ca_bundle` as seen by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPatch {
    /// Target of the patch
    pub target: WebhookTarget,
    /// Bytes that were sent
    pub ca_bundle: Vec<u8>,
    /// When the call happened (tokio clock, so paused-time tests are exact)
    pub at: Instant,
    /// Whether the mock accepted the patch
    pub succeeded: bool,
}

#[derive(Debug, Default)]
struct MockState {
    attempts: Vec<RecordedPatch>,
    remote: HashMap<WebhookTarget, Vec<u8>>,
    fail_next: usize,
    fail_all: bool,
}

/// Mock WebhookClient for testing
#[derive(Debug, Clone, Default)]
pub struct MockWebhookClient {
    state: Arc<Mutex<MockState>>,
}

impl MockWebhookClient {
    /// Create a new mock client with no stored configurations
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `count` patch calls
    pub fn fail_next(&self, count: usize) {
        self.lock().fail_next = count;
    }

    /// Fail every patch call until switched off again
    pub fn set_fail_all(&self, fail: bool) {
        self.lock().fail_all = fail;
    }

    /// Every patch attempt so far, successful or not
    #[must_use]
    pub fn attempts(&self) -> Vec<RecordedPatch> {
        self.lock().attempts.clone()
    }

    /// Successful patches only
    #[must_use]
    pub fn patches(&self) -> Vec<RecordedPatch> {
        self.lock().attempts.iter().filter(|p| p.succeeded).cloned().collect()
    }

    /// Bytes of every successful patch, in order
    #[must_use]
    pub fn patched_bundles(&self) -> Vec<Vec<u8>> {
        self.patches().into_iter().map(|p| p.ca_bundle).collect()
    }

    /// Current `caBundle` stored for `target`
    #[must_use]
    pub fn ca_bundle(&self, target: &WebhookTarget) -> Option<Vec<u8>> {
        self.lock().remote.get(target).cloned()
    }

    /// Overwrite the stored `caBundle` as an external actor would (e.g. a reapplied manifest)
    pub fn overwrite_ca_bundle(&self, target: &WebhookTarget, ca_bundle: Option<Vec<u8>>) {
        let mut state = self.lock();
        match ca_bundle {
            Some(bytes) => {
                state.remote.insert(target.clone(), bytes);
            }
            None => {
                state.remote.remove(target);
            }
        }
    }
}

#[async_trait::async_trait]
impl WebhookClientTrait for MockWebhookClient {
    async fn patch_ca_bundle(
        &self,
        target: &WebhookTarget,
        ca_bundle: &[u8],
    ) -> Result<(), WebhookClientError> {
        let mut state = self.lock();

        let fail = if state.fail_all {
            true
        } else if state.fail_next > 0 {
            state.fail_next -= 1;
            true
        } else {
            false
        };

        state.attempts.push(RecordedPatch {
            target: target.clone(),
            ca_bundle: ca_bundle.to_vec(),
            at: Instant::now(),
            succeeded: !fail,
        });

        if fail {
            return Err(WebhookClientError::Mock(format!("patch of {target} rejected")));
        }

        state.remote.insert(target.clone(), ca_bundle.to_vec());
        Ok(())
    }
}
