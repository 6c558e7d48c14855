//! Start a migration and follow it until the VPS unlocks.
//!
//! `migrate/start` only reports that the provider accepted the request, and
//! may hold its connection open for the whole migration. Completion is
//! observed on a different call: `migrate/getLocations` fails with the
//! "locked" code while the migration runs and succeeds once it is over.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::{
    ApiError, Error, KiwiClient, LockingInfo, MigrateLocations, MigrateStartResponse, Result,
    validate,
};

/// Pause between unlock probes.
pub const MIGRATION_POLL_INTERVAL: Duration = Duration::from_secs(5);

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The two calls the wait loop needs. Implemented by [`KiwiClient`].
#[async_trait]
pub trait MigrationBackend: Send + Sync {
    async fn start_migration(
        &self,
        location: &str,
        timeout: Duration,
    ) -> Result<MigrateStartResponse>;

    /// Doubles as the unlock probe.
    async fn get_migrate_locations(&self) -> Result<MigrateLocations>;
}

#[async_trait]
impl MigrationBackend for KiwiClient {
    async fn start_migration(
        &self,
        location: &str,
        timeout: Duration,
    ) -> Result<MigrateStartResponse> {
        KiwiClient::start_migration(self, location, timeout).await
    }

    async fn get_migrate_locations(&self) -> Result<MigrateLocations> {
        KiwiClient::get_migrate_locations(self).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MigrationOptions {
    /// Deadline for the whole operation: the start call and every probe.
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            timeout: crate::DEFAULT_MIGRATION_TIMEOUT,
            interval: MIGRATION_POLL_INTERVAL,
        }
    }
}

impl MigrationOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

/// Progress reported while waiting. Locked-state events are only emitted
/// when they differ from the previous probe.
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationEvent {
    /// The start call returned; the migration is accepted, not finished.
    Accepted(MigrateStartResponse),
    /// Description of the operation holding the lock.
    Operation(String),
    Progress(LockingInfo),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MigrationOutcome {
    /// Location reported by the first successful probe.
    pub current_location: String,
    /// Start payload (new IPs, notification email), if the start call had
    /// returned by the time the VPS unlocked.
    pub accepted: Option<MigrateStartResponse>,
}

/// Last-seen lock state, local to one wait.
#[derive(Debug, Default)]
struct ProgressTracker {
    last_operation: Option<String>,
    last_progress: Option<(i64, String)>,
}

impl ProgressTracker {
    fn observe<F: FnMut(MigrationEvent)>(&mut self, err: &ApiError, on_event: &mut F) {
        if let Some(op) = err.operation.as_deref().filter(|op| !op.is_empty()) {
            if self.last_operation.as_deref() != Some(op) {
                self.last_operation = Some(op.to_string());
                on_event(MigrationEvent::Operation(op.to_string()));
            }
        }

        if let Some(info) = &err.locking {
            let key = (info.completed_percent, info.friendly_progress_message.clone());
            if self.last_progress.as_ref() != Some(&key) {
                debug!(
                    percent = info.completed_percent,
                    message = %info.friendly_progress_message,
                    "migration progress"
                );
                self.last_progress = Some(key);
                on_event(MigrationEvent::Progress(info.clone()));
            }
        }
    }
}

/// Start a migration to `location` and wait until the VPS unlocks.
///
/// The start call and the probe loop run concurrently under one deadline
/// (`options.timeout`). A "locked" answer from either is expected and keeps
/// the loop going; any other error ends it. Returning (for any reason) drops
/// the in-flight start call and probe.
pub async fn wait_for_migration<B, F>(
    backend: &B,
    location: &str,
    options: MigrationOptions,
    mut on_event: F,
) -> Result<MigrationOutcome>
where
    B: MigrationBackend + ?Sized,
    F: FnMut(MigrationEvent),
{
    validate::not_empty(location, "location")?;

    let interval = options.interval.max(MIN_POLL_INTERVAL);
    let started = Instant::now();
    let deadline = started + options.timeout;

    let mut start = backend.start_migration(location, options.timeout);
    let mut start_done = false;
    let mut accepted: Option<MigrateStartResponse> = None;

    let mut ticker = tokio::time::interval_at(started + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let expiry = tokio::time::sleep_until(deadline);
    tokio::pin!(expiry);

    let mut tracker = ProgressTracker::default();

    info!(location, timeout = ?options.timeout, "migration requested");

    loop {
        tokio::select! {
            biased;

            _ = &mut expiry => {
                return Err(Error::MigrationTimeout(options.timeout));
            }

            result = &mut start, if !start_done => {
                start_done = true;
                match result {
                    Ok(resp) => {
                        info!(new_ips = resp.new_ips.len(), "migration accepted");
                        on_event(MigrationEvent::Accepted(resp.clone()));
                        accepted = Some(resp);
                    }
                    Err(e) if e.is_locked() => {
                        debug!("start call reported lock, continuing to poll");
                    }
                    Err(e) => return Err(e),
                }
            }

            _ = ticker.tick() => {
                let probe = tokio::time::timeout_at(deadline, backend.get_migrate_locations()).await;
                match probe {
                    Err(_) => return Err(Error::MigrationTimeout(options.timeout)),
                    Ok(Ok(locations)) => {
                        info!(
                            location = %locations.current_location,
                            elapsed = ?started.elapsed(),
                            "migration finished, vps unlocked"
                        );
                        return Ok(MigrationOutcome {
                            current_location: locations.current_location,
                            accepted,
                        });
                    }
                    Ok(Err(e)) if e.is_locked() => {
                        if let Some(api) = e.api_error() {
                            tracker.observe(api, &mut on_event);
                        }
                    }
                    Ok(Err(e)) => return Err(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{AUTH_FAILURE_CODE, LOCKED_CODE};

    enum Start {
        Accept(MigrateStartResponse),
        Fail(i64),
        Hang,
    }

    enum Probe {
        Locked,
        Unlocked(&'static str),
        Fail(i64),
    }

    struct FakeBackend {
        start: Start,
        probes: Mutex<VecDeque<Probe>>,
        probe_calls: AtomicUsize,
    }

    impl FakeBackend {
        fn new(start: Start, probes: Vec<Probe>) -> Self {
            Self {
                start,
                probes: Mutex::new(probes.into()),
                probe_calls: AtomicUsize::new(0),
            }
        }
    }

    fn locked_error() -> Error {
        Error::Api(ApiError {
            code: LOCKED_CODE,
            message: "VE is locked".into(),
            operation: Some("Migrating to JPOS_1".into()),
            locking: Some(LockingInfo {
                completed_percent: 50,
                friendly_progress_message: "Copying disk".into(),
                last_status_update_secs_ago: 4,
            }),
        })
    }

    #[async_trait]
    impl MigrationBackend for FakeBackend {
        async fn start_migration(&self, _: &str, _: Duration) -> Result<MigrateStartResponse> {
            match &self.start {
                Start::Accept(resp) => Ok(resp.clone()),
                Start::Fail(code) => Err(ApiError::new(*code, "Invalid location").into()),
                Start::Hang => std::future::pending().await,
            }
        }

        async fn get_migrate_locations(&self) -> Result<MigrateLocations> {
            self.probe_calls.fetch_add(1, Ordering::SeqCst);
            let next = self.probes.lock().unwrap().pop_front().unwrap_or(Probe::Locked);
            match next {
                Probe::Locked => Err(locked_error()),
                Probe::Unlocked(location) => Ok(MigrateLocations {
                    current_location: location.into(),
                    ..Default::default()
                }),
                Probe::Fail(code) => Err(ApiError::new(code, "Authentication failure").into()),
            }
        }
    }

    fn accepted() -> MigrateStartResponse {
        MigrateStartResponse {
            new_ips: vec!["203.0.113.7".into(), "2001:db8::".into()],
            notification_email: "ops@example.com".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unlock_after_two_locked_polls() {
        let backend = FakeBackend::new(
            Start::Accept(accepted()),
            vec![Probe::Locked, Probe::Locked, Probe::Unlocked("JPOS_1")],
        );
        let options = MigrationOptions::default();
        let started = Instant::now();
        let mut events = Vec::new();

        let outcome = wait_for_migration(&backend, "JPOS_1", options, |e| events.push(e))
            .await
            .unwrap();

        assert!(started.elapsed() <= options.interval * 3);
        assert_eq!(outcome.current_location, "JPOS_1");
        assert_eq!(outcome.accepted, Some(accepted()));
        assert_eq!(backend.probe_calls.load(Ordering::SeqCst), 3);

        // The accept, then one operation line and one progress line for two
        // identical locked polls.
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], MigrationEvent::Accepted(accepted()));
        assert_eq!(events[1], MigrationEvent::Operation("Migrating to JPOS_1".into()));
        match &events[2] {
            MigrationEvent::Progress(info) => {
                assert_eq!(info.completed_percent, 50);
                assert_eq!(info.friendly_progress_message, "Copying disk");
            }
            other => panic!("expected progress event, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_while_locked() {
        let backend = FakeBackend::new(Start::Hang, vec![]);
        let options = MigrationOptions {
            timeout: Duration::from_secs(12),
            interval: Duration::from_secs(5),
        };
        let started = Instant::now();

        let err = wait_for_migration(&backend, "JPOS_1", options, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MigrationTimeout(d) if d == Duration::from_secs(12)));
        assert!(started.elapsed() <= Duration::from_secs(12) + options.interval);
        assert_eq!(backend.probe_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn start_failure_is_fatal_before_any_probe() {
        let backend = FakeBackend::new(Start::Fail(1), vec![Probe::Unlocked("JPOS_1")]);
        let mut events = Vec::new();

        let err = wait_for_migration(&backend, "NOWHERE", MigrationOptions::default(), |e| {
            events.push(e)
        })
        .await
        .unwrap_err();

        assert_eq!(err.api_error().map(|e| e.code), Some(1));
        assert_eq!(backend.probe_calls.load(Ordering::SeqCst), 0);
        assert!(events.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn locked_start_keeps_polling() {
        let backend = FakeBackend::new(Start::Fail(LOCKED_CODE), vec![Probe::Unlocked("USCA_FMT")]);

        let outcome = wait_for_migration(&backend, "USCA_FMT", MigrationOptions::default(), |_| {})
            .await
            .unwrap();

        assert_eq!(outcome.current_location, "USCA_FMT");
        assert!(outcome.accepted.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn probe_hard_error_stops_polling() {
        let backend = FakeBackend::new(
            Start::Hang,
            vec![Probe::Locked, Probe::Fail(AUTH_FAILURE_CODE), Probe::Unlocked("JPOS_1")],
        );

        let err = wait_for_migration(&backend, "JPOS_1", MigrationOptions::default(), |_| {})
            .await
            .unwrap_err();

        assert!(err.is_auth_failure());
        assert_eq!(backend.probe_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_location_is_rejected_without_calls() {
        let backend = FakeBackend::new(Start::Accept(accepted()), vec![]);
        let err = wait_for_migration(&backend, "  ", MigrationOptions::default(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
        assert_eq!(backend.probe_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn tracker_reports_only_changes() {
        let mut tracker = ProgressTracker::default();
        let mut events = Vec::new();
        let mut push = |e: MigrationEvent| events.push(e);

        let Error::Api(mut err) = locked_error() else {
            unreachable!()
        };
        tracker.observe(&err, &mut push);
        tracker.observe(&err, &mut push);

        // Elapsed-seconds changes alone do not count as new progress.
        err.locking.as_mut().unwrap().last_status_update_secs_ago = 9;
        tracker.observe(&err, &mut push);

        err.locking.as_mut().unwrap().completed_percent = 75;
        tracker.observe(&err, &mut push);

        assert_eq!(events.len(), 3);
        assert!(matches!(&events[2], MigrationEvent::Progress(i) if i.completed_percent == 75));
    }
}
