//! Renewing lease elector.

use helmsman_common::{ElectionError, ElectionIdentity, LeaderRole, RoleTransition};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::LockBackend;
use crate::state::ElectionState;
use crate::timing::ElectionTiming;

/// Result of one acquire/renew attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RenewOutcome {
    /// We hold the lease, expiry pushed out
    Renewed,
    /// Someone else holds a live lease
    HeldElsewhere,
    /// Backend error or timeout
    Unreachable,
}

/// Decides the role from a sequence of renewal outcomes.
///
/// - A renewal makes us leader.
/// - A lost renewal keeps the current role until `renew_deadline` has passed
///   since the last successful renewal, then we follow.
/// - Errors change nothing until `renew_deadline` has passed since the last
///   successful renewal (or, if we never renewed, since the backend last
///   answered), then the role is unknown.
#[derive(Debug)]
struct RenewalTracker {
    renew_deadline: Duration,
    lease_duration: Duration,
    started: Instant,
    last_renewal: Option<Instant>,
    last_contact: Option<Instant>,
}

impl RenewalTracker {
    fn new(timing: &ElectionTiming, started: Instant) -> Self {
        Self {
            renew_deadline: timing.renew_deadline(),
            lease_duration: timing.lease_duration(),
            started,
            last_renewal: None,
            last_contact: None,
        }
    }

    /// Role to switch to, `None` to keep the current one
    fn observe(&mut self, outcome: RenewOutcome, now: Instant) -> Option<LeaderRole> {
        match outcome {
            RenewOutcome::Renewed => {
                self.last_renewal = Some(now);
                self.last_contact = Some(now);
                Some(LeaderRole::Leader)
            }
            RenewOutcome::HeldElsewhere => {
                self.last_contact = Some(now);
                match self.last_renewal {
                    Some(at) if now.duration_since(at) < self.renew_deadline => None,
                    _ => {
                        self.last_renewal = None;
                        Some(LeaderRole::Follower)
                    }
                }
            }
            RenewOutcome::Unreachable => {
                // A refusal is contact but not a renewal
                let since = match self.last_renewal {
                    Some(at) => at,
                    None => self.last_contact.unwrap_or(self.started),
                };
                if now.duration_since(since) >= self.renew_deadline {
                    self.last_renewal = None;
                    Some(LeaderRole::Unknown)
                } else {
                    None
                }
            }
        }
    }

    /// True while our last renewal may still be live on the backend
    fn may_hold_lease(&self, now: Instant) -> bool {
        self.last_renewal
            .is_some_and(|at| now.duration_since(at) < self.lease_duration)
    }
}

/// The background loop owned by a `LeaseElector`
struct LeaseLoop {
    key: String,
    holder: String,
    timing: ElectionTiming,
    backend: Arc<dyn LockBackend>,
    state: Arc<ElectionState>,
    tracker: RenewalTracker,
}

impl LeaseLoop {
    async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.timing.retry_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                // A send or the elector being dropped
                _ = shutdown.recv() => break,
            }
        }

        self.release().await;
        self.state.clear();
    }

    async fn tick(&mut self) {
        let now = Instant::now();
        let attempt = self.backend.try_acquire_or_renew(
            &self.key,
            &self.holder,
            self.timing.lease_duration(),
        );

        let outcome = match tokio::time::timeout(self.timing.call_timeout(), attempt).await {
            Ok(Ok(true)) => RenewOutcome::Renewed,
            Ok(Ok(false)) => RenewOutcome::HeldElsewhere,
            Ok(Err(e)) => {
                tracing::warn!(
                    key = %self.key,
                    backend = self.backend.kind(),
                    reason = e.reason(),
                    error = %e,
                    "Lease renewal failed"
                );
                RenewOutcome::Unreachable
            }
            Err(_) => {
                tracing::warn!(
                    key = %self.key,
                    backend = self.backend.kind(),
                    timeout = ?self.timing.call_timeout(),
                    "Lease renewal timed out"
                );
                RenewOutcome::Unreachable
            }
        };

        tracing::trace!(key = %self.key, outcome = ?outcome, "Lease tick");

        let Some(role) = self.tracker.observe(outcome, now) else {
            return;
        };

        let detail = (role == LeaderRole::Leader).then_some(self.holder.as_str());
        self.state.set(role, detail);
    }

    async fn release(&self) {
        if !self.tracker.may_hold_lease(Instant::now()) {
            return;
        }

        let release = self.backend.release(&self.key, &self.holder);
        match tokio::time::timeout(self.timing.call_timeout(), release).await {
            Ok(Ok(true)) => tracing::info!(key = %self.key, "Lease released"),
            Ok(Ok(false)) => tracing::debug!(key = %self.key, "Lease already gone"),
            Ok(Err(e)) => tracing::warn!(key = %self.key, error = %e, "Failed to release lease"),
            Err(_) => tracing::warn!(key = %self.key, "Lease release timed out"),
        }
    }
}

/// Elector that leads while it holds a renewable lock record
pub struct LeaseElector {
    identity: ElectionIdentity,
    state: Arc<ElectionState>,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl LeaseElector {
    /// Check the backend answers, then start renewing in the background.
    ///
    /// `holder` is this process's contender id; the lock key is the
    /// identity's unique key. Fails with `InitializationFailed` if the
    /// backend cannot be read within the lease duration.
    pub async fn start(
        identity: ElectionIdentity,
        holder: impl Into<String>,
        timing: ElectionTiming,
        backend: Arc<dyn LockBackend>,
    ) -> Result<Self, ElectionError> {
        let key = identity.unique_key().to_string();
        let holder = holder.into();

        let current = tokio::time::timeout(timing.lease_duration(), backend.read(&key))
            .await
            .map_err(|_| {
                ElectionError::InitializationFailed(format!(
                    "{} backend did not answer within {:?}",
                    backend.kind(),
                    timing.lease_duration()
                ))
            })?
            .map_err(ElectionError::into_initialization)?;

        tracing::info!(
            key = %key,
            holder = %holder,
            backend = backend.kind(),
            current_holder = ?current.as_ref().map(|r| r.holder.as_str()),
            timing = %timing,
            "Lease elector started"
        );

        let state = Arc::new(ElectionState::new(key.clone()));
        let (shutdown, shutdown_rx) = broadcast::channel(1);

        let lease_loop = LeaseLoop {
            key,
            holder,
            timing,
            backend,
            state: state.clone(),
            tracker: RenewalTracker::new(&timing, Instant::now()),
        };
        let task = tokio::spawn(lease_loop.run(shutdown_rx));

        Ok(Self {
            identity,
            state,
            shutdown,
            task,
        })
    }

    pub fn identity(&self) -> &ElectionIdentity {
        &self.identity
    }

    pub fn role(&self) -> LeaderRole {
        self.state.role()
    }

    pub fn is_leader(&self) -> bool {
        self.state.is_leader()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoleTransition> {
        self.state.subscribe()
    }

    /// Stop renewing and release the lease if we hold it
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            tracing::warn!(key = %self.identity.unique_key(), error = %e, "Lease loop ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease::MemoryLockBackend;
    use async_trait::async_trait;
    use helmsman_common::LeaseRecord;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn timing() -> ElectionTiming {
        ElectionTiming::new(
            Duration::from_secs(10),
            Duration::from_secs(6),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    fn identity() -> ElectionIdentity {
        ElectionIdentity::new("test", "jobs", "scheduler")
    }

    /// Backend whose answers are switched from the test
    #[derive(Default)]
    struct ScriptedBackend {
        refuse: AtomicBool,
        unreachable: AtomicBool,
        reads: AtomicUsize,
        releases: AtomicUsize,
    }

    #[async_trait]
    impl LockBackend for ScriptedBackend {
        fn kind(&self) -> &'static str {
            "scripted"
        }

        async fn read(&self, _key: &str) -> Result<Option<LeaseRecord>, ElectionError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.unreachable.load(Ordering::SeqCst) {
                return Err(ElectionError::BackendUnavailable("down".into()));
            }
            Ok(None)
        }

        async fn try_acquire_or_renew(
            &self,
            _key: &str,
            _holder: &str,
            _ttl: Duration,
        ) -> Result<bool, ElectionError> {
            if self.unreachable.load(Ordering::SeqCst) {
                return Err(ElectionError::BackendUnavailable("down".into()));
            }
            Ok(!self.refuse.load(Ordering::SeqCst))
        }

        async fn release(&self, _key: &str, _holder: &str) -> Result<bool, ElectionError> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    async fn sleep_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[test]
    fn test_tracker_grace_period() {
        let t0 = Instant::now();
        let mut tracker = RenewalTracker::new(&timing(), t0);
        let at = |s: u64| t0 + Duration::from_secs(s);

        assert_eq!(tracker.observe(RenewOutcome::Renewed, at(0)), Some(LeaderRole::Leader));
        assert_eq!(tracker.observe(RenewOutcome::HeldElsewhere, at(3)), None);
        assert_eq!(tracker.observe(RenewOutcome::HeldElsewhere, at(5)), None);
        assert_eq!(
            tracker.observe(RenewOutcome::HeldElsewhere, at(6)),
            Some(LeaderRole::Follower)
        );
        assert_eq!(
            tracker.observe(RenewOutcome::HeldElsewhere, at(7)),
            Some(LeaderRole::Follower)
        );
    }

    #[test]
    fn test_tracker_unknown_only_after_sustained_silence() {
        let t0 = Instant::now();
        let mut tracker = RenewalTracker::new(&timing(), t0);
        let at = |s: u64| t0 + Duration::from_secs(s);

        assert_eq!(tracker.observe(RenewOutcome::Renewed, at(1)), Some(LeaderRole::Leader));
        assert_eq!(tracker.observe(RenewOutcome::Unreachable, at(2)), None);
        assert_eq!(tracker.observe(RenewOutcome::Unreachable, at(6)), None);
        assert_eq!(
            tracker.observe(RenewOutcome::Unreachable, at(7)),
            Some(LeaderRole::Unknown)
        );
        assert!(!tracker.may_hold_lease(at(7)));
    }

    #[test]
    fn test_tracker_refusal_does_not_extend_grace() {
        let t0 = Instant::now();
        let mut tracker = RenewalTracker::new(&timing(), t0);
        let at = |ms: u64| t0 + Duration::from_millis(ms);

        assert_eq!(tracker.observe(RenewOutcome::Renewed, at(0)), Some(LeaderRole::Leader));
        assert_eq!(tracker.observe(RenewOutcome::HeldElsewhere, at(5000)), None);
        assert_eq!(tracker.observe(RenewOutcome::Unreachable, at(5500)), None);
        assert_eq!(
            tracker.observe(RenewOutcome::Unreachable, at(6000)),
            Some(LeaderRole::Unknown)
        );
        // Stays demoted while the backend is down
        for ms in [7000, 8000, 9000, 10_000] {
            assert_ne!(
                tracker.observe(RenewOutcome::Unreachable, at(ms)),
                Some(LeaderRole::Leader)
            );
        }
    }

    #[test]
    fn test_tracker_never_renewed_follows_immediately() {
        let t0 = Instant::now();
        let mut tracker = RenewalTracker::new(&timing(), t0);
        assert_eq!(
            tracker.observe(RenewOutcome::HeldElsewhere, t0),
            Some(LeaderRole::Follower)
        );
        assert!(!tracker.may_hold_lease(t0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_leader_before_first_tick() {
        let backend = Arc::new(MemoryLockBackend::new());
        let elector = LeaseElector::start(identity(), "node-1", timing(), backend)
            .await
            .unwrap();

        assert!(!elector.is_leader());
        assert_eq!(elector.role(), LeaderRole::Unknown);
        elector.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquires_and_keeps_leadership() {
        let backend = Arc::new(MemoryLockBackend::new());
        let elector = LeaseElector::start(identity(), "node-1", timing(), backend.clone())
            .await
            .unwrap();

        sleep_ms(1000).await;
        assert!(elector.is_leader());

        for _ in 0..4 {
            sleep_ms(1000).await;
            assert!(elector.is_leader());
        }

        let record = backend.read(identity().unique_key()).await.unwrap().unwrap();
        assert_eq!(record.holder, "node-1");
        elector.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_held_by_other_identity() {
        let backend = Arc::new(MemoryLockBackend::new());
        backend
            .try_acquire_or_renew(identity().unique_key(), "node-2", Duration::from_secs(3600))
            .await
            .unwrap();

        let elector = LeaseElector::start(identity(), "node-1", timing(), backend)
            .await
            .unwrap();
        let mut transitions = elector.subscribe();

        for _ in 0..5 {
            sleep_ms(1000).await;
            assert!(!elector.is_leader());
        }
        assert_eq!(elector.role(), LeaderRole::Follower);
        assert_eq!(
            transitions.try_recv().unwrap(),
            RoleTransition {
                from: LeaderRole::Unknown,
                to: LeaderRole::Follower
            }
        );
        elector.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_leadership_kept_until_renew_deadline() {
        let backend = Arc::new(ScriptedBackend::default());
        let elector = LeaseElector::start(identity(), "node-1", timing(), backend.clone())
            .await
            .unwrap();

        // First tick fires immediately at t=0
        sleep_ms(100).await;
        assert!(elector.is_leader());
        backend.refuse.store(true, Ordering::SeqCst);

        // Failed renewals at 1s..5s stay within the 6s grace period
        sleep_ms(5400).await;
        assert!(elector.is_leader());

        // Tick at 6s exhausts it
        sleep_ms(1000).await;
        assert!(!elector.is_leader());
        assert_eq!(elector.role(), LeaderRole::Follower);

        // Only the startup read; ticks make a single renewal call
        assert_eq!(backend.reads.load(Ordering::SeqCst), 1);
        elector.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_errors_absorbed_then_unknown() {
        let backend = Arc::new(ScriptedBackend::default());
        let elector = LeaseElector::start(identity(), "node-1", timing(), backend.clone())
            .await
            .unwrap();

        sleep_ms(100).await;
        assert!(elector.is_leader());
        backend.unreachable.store(true, Ordering::SeqCst);

        sleep_ms(5400).await;
        assert_eq!(elector.role(), LeaderRole::Leader);

        sleep_ms(1000).await;
        assert_eq!(elector.role(), LeaderRole::Unknown);
        assert!(!elector.is_leader());

        // Recovers on the next good tick
        backend.unreachable.store(false, Ordering::SeqCst);
        sleep_ms(1000).await;
        assert!(elector.is_leader());
        elector.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_refusals_then_errors_drop_leadership_at_renew_deadline() {
        let backend = Arc::new(ScriptedBackend::default());
        let elector = LeaseElector::start(identity(), "node-1", timing(), backend.clone())
            .await
            .unwrap();

        // Renewed at t=0, refused at 1s..4s
        sleep_ms(100).await;
        assert!(elector.is_leader());
        backend.refuse.store(true, Ordering::SeqCst);

        // Errors from the 5s tick on
        sleep_ms(4400).await;
        assert!(elector.is_leader());
        backend.unreachable.store(true, Ordering::SeqCst);

        sleep_ms(1000).await;
        assert!(elector.is_leader());

        // 6s after the last renewal
        sleep_ms(1000).await;
        assert_eq!(elector.role(), LeaderRole::Unknown);

        for _ in 0..4 {
            sleep_ms(1000).await;
            assert!(!elector.is_leader());
        }
        elector.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_releases_lease() {
        let backend = Arc::new(MemoryLockBackend::new());
        let elector = LeaseElector::start(identity(), "node-1", timing(), backend.clone())
            .await
            .unwrap();

        sleep_ms(100).await;
        assert!(elector.is_leader());

        elector.stop().await;
        assert!(backend.read(identity().unique_key()).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_releases_lease() {
        let backend = Arc::new(ScriptedBackend::default());
        let elector = LeaseElector::start(identity(), "node-1", timing(), backend.clone())
            .await
            .unwrap();

        sleep_ms(100).await;
        drop(elector);
        sleep_ms(100).await;
        assert_eq!(backend.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_follower_does_not_release() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.refuse.store(true, Ordering::SeqCst);
        let elector = LeaseElector::start(identity(), "node-1", timing(), backend.clone())
            .await
            .unwrap();

        sleep_ms(100).await;
        elector.stop().await;
        assert_eq!(backend.releases.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unreachable_backend_fails_start() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.unreachable.store(true, Ordering::SeqCst);

        let result = LeaseElector::start(identity(), "node-1", timing(), backend).await;
        assert!(matches!(
            result.err(),
            Some(ElectionError::InitializationFailed(_))
        ));
    }
}
