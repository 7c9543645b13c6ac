//! Unit tests for the CA bundle reconciler
//!
//! Timer-driven tests run on a paused tokio clock, so "one interval later" is
//! exact and every recorded patch carries a deterministic timestamp.

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::reconciler::{Reconciler, TRIGGER_QUEUE_DEPTH};
    use crate::test_utils::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::{Instant, sleep};
    use tokio_util::sync::CancellationToken;
    use webhook_client::MockWebhookClient;

    const INTERVAL: Duration = Duration::from_secs(1);
    const CERT: &str = "root-cert.pem";

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    /// Sleep until `offset` after `start` on the tokio clock
    async fn advance_to(start: Instant, offset: Duration) {
        tokio::time::sleep_until(start + offset).await;
    }

    /// Poll `condition` in real time for up to five seconds
    async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            sleep(ms(10)).await;
        }
    }

    fn unwatched(dir: &TempDir, mock: &MockWebhookClient) -> Reconciler {
        let path = dir.path().join(CERT);
        Reconciler::unwatched(test_config(path, INTERVAL), Box::new(mock.clone()))
            .expect("reconciler should start")
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_reaches_cluster_on_next_tick() {
        let dir = TempDir::new().expect("tempdir");
        write_cert(dir.path(), CERT, b"CERT_A");
        let mock = MockWebhookClient::new();
        let cancel = CancellationToken::new();

        let start = Instant::now();
        let (handle, task) = unwatched(&dir, &mock).spawn(cancel.clone());

        // Nothing is patched before the first tick
        advance_to(start, ms(900)).await;
        assert!(mock.attempts().is_empty());

        advance_to(start, ms(1_400)).await;
        assert_eq!(mock.patched_bundles(), vec![b"CERT_A".to_vec()]);

        write_cert(dir.path(), CERT, b"CERT_B");
        handle.request_refresh().await.expect("reconciler running");

        // The refresh updates the cache but does not patch by itself
        advance_to(start, ms(1_900)).await;
        assert_eq!(handle.current().as_bytes(), b"CERT_B");
        assert_eq!(mock.attempts().len(), 1);

        advance_to(start, ms(2_100)).await;
        let patches = mock.patches();
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[0].ca_bundle, b"CERT_A");
        assert_eq!(patches[0].at - start, ms(1_000));
        assert_eq!(patches[1].ca_bundle, b"CERT_B");
        assert_eq!(patches[1].at - start, ms(2_000));
        assert_eq!(patches[1].target, test_target());

        cancel.cancel();
        task.await.expect("reconciler task panicked");
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_overwrite_is_healed_within_one_interval() {
        let dir = TempDir::new().expect("tempdir");
        write_cert(dir.path(), CERT, b"CERT_A");
        let mock = MockWebhookClient::new();
        let cancel = CancellationToken::new();

        let start = Instant::now();
        let (_handle, task) = unwatched(&dir, &mock).spawn(cancel.clone());

        advance_to(start, ms(1_100)).await;
        assert_eq!(mock.ca_bundle(&test_target()), Some(b"CERT_A".to_vec()));

        // A reapplied manifest drops the field
        mock.overwrite_ca_bundle(&test_target(), None);
        assert_eq!(mock.ca_bundle(&test_target()), None);

        advance_to(start, ms(2_100)).await;
        assert_eq!(mock.ca_bundle(&test_target()), Some(b"CERT_A".to_vec()));

        // And a wrong value is overwritten the same way
        mock.overwrite_ca_bundle(&test_target(), Some(b"WRONG".to_vec()));
        advance_to(start, ms(3_100)).await;
        assert_eq!(mock.ca_bundle(&test_target()), Some(b"CERT_A".to_vec()));

        cancel.cancel();
        task.await.expect("reconciler task panicked");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_read_keeps_last_good_bundle() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_cert(dir.path(), CERT, b"CERT_A");
        let mock = MockWebhookClient::new();
        let cancel = CancellationToken::new();

        let start = Instant::now();
        let (handle, task) = unwatched(&dir, &mock).spawn(cancel.clone());

        // File briefly absent during a rewrite
        std::fs::remove_file(&path).expect("remove");
        handle.request_refresh().await.expect("reconciler running");
        advance_to(start, ms(1_100)).await;
        assert_eq!(handle.current().as_bytes(), b"CERT_A");

        // Truncated mid-rewrite
        write_cert(dir.path(), CERT, b"");
        handle.request_refresh().await.expect("reconciler running");
        advance_to(start, ms(2_100)).await;

        assert_eq!(handle.current().as_bytes(), b"CERT_A");
        assert_eq!(
            mock.patched_bundles(),
            vec![b"CERT_A".to_vec(), b"CERT_A".to_vec()]
        );

        cancel.cancel();
        task.await.expect("reconciler task panicked");
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_changes_coalesces_into_one_patch() {
        let dir = TempDir::new().expect("tempdir");
        write_cert(dir.path(), CERT, b"CERT_A");
        let mock = MockWebhookClient::new();
        let cancel = CancellationToken::new();

        let start = Instant::now();
        let (handle, task) = unwatched(&dir, &mock).spawn(cancel.clone());

        advance_to(start, ms(1_100)).await;
        assert_eq!(mock.attempts().len(), 1);

        for i in 0..10 {
            write_cert(dir.path(), CERT, format!("CERT_{i}").as_bytes());
            handle.request_refresh().await.expect("reconciler running");
            sleep(ms(50)).await;
        }

        advance_to(start, ms(2_100)).await;
        assert_eq!(
            mock.patched_bundles(),
            vec![b"CERT_A".to_vec(), b"CERT_9".to_vec()],
            "ten changes within one interval must cost exactly one patch"
        );

        cancel.cancel();
        task.await.expect("reconciler task panicked");
    }

    #[tokio::test(start_paused = true)]
    async fn test_patch_failures_do_not_stop_ticks() {
        let dir = TempDir::new().expect("tempdir");
        write_cert(dir.path(), CERT, b"CERT_A");
        let mock = MockWebhookClient::new();
        mock.fail_next(3);
        let cancel = CancellationToken::new();

        let start = Instant::now();
        let (_handle, task) = unwatched(&dir, &mock).spawn(cancel.clone());

        advance_to(start, ms(4_500)).await;

        let attempts = mock.attempts();
        assert_eq!(attempts.len(), 4);
        for (k, attempt) in attempts.iter().enumerate() {
            let expected = INTERVAL * u32::try_from(k + 1).expect("small index");
            assert_eq!(attempt.at - start, expected, "attempt {k} off schedule");
            assert_eq!(attempt.ca_bundle, b"CERT_A");
        }
        assert!(!attempts[0].succeeded && !attempts[1].succeeded && !attempts[2].succeeded);
        assert!(attempts[3].succeeded);
        assert_eq!(mock.ca_bundle(&test_target()), Some(b"CERT_A".to_vec()));

        cancel.cancel();
        task.await.expect("reconciler task panicked");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_failure_retries_every_tick() {
        let dir = TempDir::new().expect("tempdir");
        write_cert(dir.path(), CERT, b"CERT_A");
        let mock = MockWebhookClient::new();
        mock.set_fail_all(true);
        let cancel = CancellationToken::new();

        let start = Instant::now();
        let (_handle, task) = unwatched(&dir, &mock).spawn(cancel.clone());

        advance_to(start, ms(10_500)).await;
        assert_eq!(mock.attempts().len(), 10);
        assert!(mock.patches().is_empty());

        // Condition clears; the very next tick succeeds
        mock.set_fail_all(false);
        advance_to(start, ms(11_500)).await;
        assert_eq!(mock.patches().len(), 1);

        cancel.cancel();
        task.await.expect("reconciler task panicked");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_the_loop() {
        let dir = TempDir::new().expect("tempdir");
        write_cert(dir.path(), CERT, b"CERT_A");
        let mock = MockWebhookClient::new();
        let cancel = CancellationToken::new();

        let start = Instant::now();
        let (handle, task) = unwatched(&dir, &mock).spawn(cancel.clone());

        advance_to(start, ms(2_500)).await;
        assert_eq!(mock.attempts().len(), 2);

        cancel.cancel();
        task.await.expect("reconciler task panicked");

        advance_to(start, ms(5_500)).await;
        assert_eq!(mock.attempts().len(), 2, "no patches after cancellation");

        // The cache stays readable, but refreshes are refused once stopped
        assert_eq!(handle.current().as_bytes(), b"CERT_A");
        assert!(matches!(
            handle.request_refresh().await,
            Err(ControllerError::TaskFailed(_))
        ));
    }

    #[test]
    fn test_unreadable_certificate_is_fatal() {
        let dir = TempDir::new().expect("tempdir");
        let mock = MockWebhookClient::new();

        let result = Reconciler::new(
            test_config(dir.path().join("missing.pem"), INTERVAL),
            Box::new(mock.clone()),
        );

        assert!(matches!(result, Err(ControllerError::CertSource(_))));
        assert!(mock.attempts().is_empty());
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_cert(dir.path(), CERT, b"CERT_A");

        let result = Reconciler::unwatched(
            test_config(path, Duration::ZERO),
            Box::new(MockWebhookClient::new()),
        );

        assert!(matches!(result, Err(ControllerError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_atomic_rotation_is_picked_up_by_directory_watch() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_cert(dir.path(), CERT, b"CERT_A");
        let mock = MockWebhookClient::new();
        let cancel = CancellationToken::new();

        let reconciler = Reconciler::new(test_config(path, ms(50)), Box::new(mock.clone()))
            .expect("reconciler should start");
        let (handle, task) = reconciler.spawn(cancel.clone());

        rotate_cert_atomically(dir.path(), CERT, b"CERT_B");

        wait_for("rotated bundle to be patched", || {
            mock.patched_bundles().last().map(Vec::as_slice) == Some(b"CERT_B".as_slice())
        })
        .await;
        assert_eq!(handle.current().as_bytes(), b"CERT_B");

        cancel.cancel();
        task.await.expect("reconciler task panicked");
    }

    #[tokio::test]
    async fn test_rotation_burst_beyond_queue_depth_costs_one_patch() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_cert(dir.path(), CERT, b"CERT_A");
        let mock = MockWebhookClient::new();
        let cancel = CancellationToken::new();

        let reconciler = Reconciler::new(test_config(path, INTERVAL), Box::new(mock.clone()))
            .expect("reconciler should start");
        let (handle, task) = reconciler.spawn(cancel.clone());

        // Start right after a tick so the whole burst lands inside one interval
        wait_for("first tick", || mock.attempts().len() == 1).await;

        let rotations = TRIGGER_QUEUE_DEPTH * 3;
        for i in 0..rotations {
            rotate_cert_atomically(dir.path(), CERT, format!("CERT_{i}").as_bytes());
        }
        let last = format!("CERT_{}", rotations - 1);

        wait_for("second tick", || mock.attempts().len() == 2).await;

        let attempts = mock.attempts();
        assert_eq!(attempts[0].ca_bundle, b"CERT_A");
        assert_eq!(attempts[1].ca_bundle, last.as_bytes(), "burst must end on the last rotation");
        assert!(
            attempts[1].at - attempts[0].at >= ms(900),
            "filesystem events must not cause patches between ticks"
        );
        assert_eq!(handle.current().as_bytes(), last.as_bytes());

        cancel.cancel();
        task.await.expect("reconciler task panicked");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_logged_with_target_and_path() {
        let logs = CapturedLogs::default();
        let _guard = tracing::subscriber::set_default(logs.subscriber());

        let dir = TempDir::new().expect("tempdir");
        let path = write_cert(dir.path(), CERT, b"CERT_A");
        let mock = MockWebhookClient::new();
        mock.set_fail_all(true);
        let cancel = CancellationToken::new();

        let start = Instant::now();
        let (handle, task) = unwatched(&dir, &mock).spawn(cancel.clone());

        std::fs::remove_file(&path).expect("remove");
        handle.request_refresh().await.expect("reconciler running");
        advance_to(start, ms(1_100)).await;

        let path_field = format!("path={}", path.display());
        for message in ["CA bundle file read error", "Patch webhook failed"] {
            let lines = logs.lines_containing(message);
            assert_eq!(lines.len(), 1, "expected one `{message}` record, got {lines:?}");
            assert!(lines[0].contains("ERROR"), "{}", lines[0]);
            assert!(lines[0].contains("config=istio-sidecar-injector"), "{}", lines[0]);
            assert!(lines[0].contains("webhook=sidecar-injector.istio.io"), "{}", lines[0]);
            assert!(lines[0].contains(&path_field), "{}", lines[0]);
        }

        cancel.cancel();
        task.await.expect("reconciler task panicked");
    }
}
