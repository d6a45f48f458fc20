//! Membership-view elector.

use helmsman_common::{ElectionError, ElectionIdentity, LeaderRole, RoleTransition};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::{MemberAddress, MembershipHandle, MembershipTransport};
use crate::state::ElectionState;
use crate::timing::ElectionTiming;

/// Role of `local` in `view`; the first member leads.
///
/// An empty view, or one that does not contain `local`, says nothing about
/// who leads and is reported as a `CapabilityMismatch`.
fn evaluate_view(view: &[MemberAddress], local: &str) -> Result<LeaderRole, ElectionError> {
    let Some(first) = view.first() else {
        return Err(ElectionError::CapabilityMismatch("membership view is empty".to_string()));
    };

    if first == local {
        Ok(LeaderRole::Leader)
    } else if view.iter().any(|member| member == local) {
        Ok(LeaderRole::Follower)
    } else {
        Err(ElectionError::CapabilityMismatch(format!(
            "local address {} missing from view of {} members",
            local,
            view.len()
        )))
    }
}

/// The background loop owned by a `ViewElector`
struct ViewLoop {
    key: String,
    timing: ElectionTiming,
    handle: Box<dyn MembershipHandle>,
    state: Arc<ElectionState>,
    last_view: Instant,
}

impl ViewLoop {
    async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.timing.retry_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = shutdown.recv() => break,
            }
        }

        if tokio::time::timeout(self.timing.call_timeout(), self.handle.leave())
            .await
            .is_err()
        {
            tracing::warn!(key = %self.key, "Leaving the group timed out");
        }
        tracing::info!(
            key = %self.key,
            local = %self.handle.local_address(),
            "Exited from cluster group"
        );
        self.state.clear();
    }

    async fn tick(&mut self) {
        let now = Instant::now();
        let fetch = self.handle.current_view();

        let view = match tokio::time::timeout(self.timing.call_timeout(), fetch).await {
            Ok(Ok(view)) => view,
            Ok(Err(e)) => {
                tracing::warn!(key = %self.key, reason = e.reason(), error = %e, "Failed to fetch membership view");
                self.on_unreachable(now);
                return;
            }
            Err(_) => {
                tracing::warn!(key = %self.key, timeout = ?self.timing.call_timeout(), "Membership view fetch timed out");
                self.on_unreachable(now);
                return;
            }
        };
        self.last_view = now;

        let local = self.handle.local_address();
        tracing::trace!(key = %self.key, local = %local, view = ?view, "View tick");

        match evaluate_view(&view, local) {
            Ok(role) => {
                let leader = view.first().map(String::as_str);
                self.state.set(role, leader);
            }
            Err(e) => {
                tracing::debug!(key = %self.key, reason = e.reason(), error = %e, "Unusable membership view");
                self.state.set(LeaderRole::Unknown, Some(local));
            }
        }
    }

    fn on_unreachable(&self, now: Instant) {
        if now.duration_since(self.last_view) >= self.timing.renew_deadline() {
            self.state.set(LeaderRole::Unknown, None);
        }
    }
}

/// Elector that leads while it is first in the group's membership view
pub struct ViewElector {
    identity: ElectionIdentity,
    state: Arc<ElectionState>,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl ViewElector {
    /// Join the group named by the identity's unique key and start watching
    /// its view. Fails with `InitializationFailed` if the join fails or takes
    /// longer than the lease duration.
    pub async fn start(
        identity: ElectionIdentity,
        timing: ElectionTiming,
        transport: Arc<dyn MembershipTransport>,
    ) -> Result<Self, ElectionError> {
        let key = identity.unique_key().to_string();

        let handle = tokio::time::timeout(timing.lease_duration(), transport.join(&key))
            .await
            .map_err(|_| {
                ElectionError::InitializationFailed(format!(
                    "{} transport did not join {} within {:?}",
                    transport.kind(),
                    key,
                    timing.lease_duration()
                ))
            })?
            .map_err(ElectionError::into_initialization)?;

        tracing::info!(
            key = %key,
            transport = transport.kind(),
            local = %handle.local_address(),
            timing = %timing,
            "Connected to cluster group"
        );

        let state = Arc::new(ElectionState::new(key.clone()));
        let (shutdown, shutdown_rx) = broadcast::channel(1);

        let view_loop = ViewLoop {
            key,
            timing,
            handle,
            state: state.clone(),
            last_view: Instant::now(),
        };
        let task = tokio::spawn(view_loop.run(shutdown_rx));

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

    /// Stop watching the view and leave the group
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            tracing::warn!(key = %self.identity.unique_key(), error = %e, "View loop ended abnormally");
        }
    }
}
