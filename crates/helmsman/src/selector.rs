//! Strategy selection.
//!
//! The lease strategy is used when its backend looks reachable and starts
//! cleanly; otherwise the process falls back to the membership view. The
//! choice is made once, when the elector is built.

use async_trait::async_trait;
use helmsman_common::constants::LEASE_BACKEND_ENV_PREFIX;
use helmsman_common::{ElectionError, ElectionIdentity, LeaderRole, RoleTransition};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::lease::{LeaseElector, LockBackend};
use crate::timing::ElectionTiming;
use crate::view::{MembershipTransport, ViewElector};

/// Decides whether the lease backend can be used.
///
/// Must be cheap (no election attempt) and must never fail: anything that
/// goes wrong means "unavailable".
#[async_trait]
pub trait AvailabilityProbe: Send + Sync {
    async fn lease_backend_available(&self, backend: &dyn LockBackend, key: &str) -> bool;
}

/// Probe based on environment markers and a read of the lock record
#[derive(Debug, Clone)]
pub struct EnvironmentProbe {
    /// Prefix of environment variables that mark a configured backend
    pub env_prefix: String,
    /// Require at least one marker variable
    pub check_environment: bool,
    /// Require a successful read of the lock record
    pub check_endpoint: bool,
    /// Bound for the endpoint read
    pub timeout: Duration,
}

impl Default for EnvironmentProbe {
    fn default() -> Self {
        Self {
            env_prefix: LEASE_BACKEND_ENV_PREFIX.to_string(),
            check_environment: true,
            check_endpoint: true,
            timeout: Duration::from_secs(2),
        }
    }
}

impl EnvironmentProbe {
    /// Does any variable name in `vars` start with the marker prefix?
    pub fn has_markers<I, K>(&self, vars: I) -> bool
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        vars.into_iter()
            .any(|name| name.as_ref().starts_with(&self.env_prefix))
    }

    /// Can the lock record be read within the timeout?
    pub async fn has_endpoint(&self, backend: &dyn LockBackend, key: &str) -> bool {
        match tokio::time::timeout(self.timeout, backend.read(key)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!(backend = backend.kind(), error = %e, "Lease backend not reachable");
                false
            }
            Err(_) => {
                tracing::debug!(backend = backend.kind(), timeout = ?self.timeout, "Lease backend probe timed out");
                false
            }
        }
    }
}

#[async_trait]
impl AvailabilityProbe for EnvironmentProbe {
    async fn lease_backend_available(&self, backend: &dyn LockBackend, key: &str) -> bool {
        // Decided before any await: the env iterator is not Send
        let marked = !self.check_environment
            || self.has_markers(
                std::env::vars_os().map(|(name, _)| name.to_string_lossy().into_owned()),
            );
        if !marked {
            tracing::debug!(prefix = %self.env_prefix, "No lease backend markers in environment");
            return false;
        }

        if self.check_endpoint && !self.has_endpoint(backend, key).await {
            return false;
        }

        true
    }
}

enum Strategy {
    Lease(LeaseElector),
    View(ViewElector),
}

/// A running election, whichever strategy backs it
pub struct Elector {
    strategy: Strategy,
}

impl Elector {
    /// Is this process currently the leader? Never blocks.
    pub fn is_leader(&self) -> bool {
        match &self.strategy {
            Strategy::Lease(elector) => elector.is_leader(),
            Strategy::View(elector) => elector.is_leader(),
        }
    }

    pub fn role(&self) -> LeaderRole {
        match &self.strategy {
            Strategy::Lease(elector) => elector.role(),
            Strategy::View(elector) => elector.role(),
        }
    }

    pub fn identity(&self) -> &ElectionIdentity {
        match &self.strategy {
            Strategy::Lease(elector) => elector.identity(),
            Strategy::View(elector) => elector.identity(),
        }
    }

    /// Receive every subsequent role change
    pub fn subscribe(&self) -> broadcast::Receiver<RoleTransition> {
        match &self.strategy {
            Strategy::Lease(elector) => elector.subscribe(),
            Strategy::View(elector) => elector.subscribe(),
        }
    }

    /// Stop the election, releasing the lease or leaving the group
    pub async fn stop(self) {
        match self.strategy {
            Strategy::Lease(elector) => elector.stop().await,
            Strategy::View(elector) => elector.stop().await,
        }
    }
}

/// Builds electors, choosing the strategy once per election.
///
/// Build one selector at startup and pass it to the call sites that need
/// an election; each `elect` call starts an independent elector.
pub struct ElectorSelector {
    /// Contender id used as the lease holder
    holder: String,
    lock_backend: Option<Arc<dyn LockBackend>>,
    membership: Arc<dyn MembershipTransport>,
    probe: Arc<dyn AvailabilityProbe>,
}

impl ElectorSelector {
    /// `lock_backend` is `None` when no lease backend is configured
    pub fn new(
        holder: impl Into<String>,
        lock_backend: Option<Arc<dyn LockBackend>>,
        membership: Arc<dyn MembershipTransport>,
    ) -> Self {
        Self {
            holder: holder.into(),
            lock_backend,
            membership,
            probe: Arc::new(EnvironmentProbe::default()),
        }
    }

    /// Replace the availability probe
    pub fn with_probe(mut self, probe: Arc<dyn AvailabilityProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Start an election for `identity`, with the default timing if none given
    pub async fn elect(
        &self,
        identity: ElectionIdentity,
        timing: Option<ElectionTiming>,
    ) -> Result<Elector, ElectionError> {
        let timing = timing.unwrap_or_default();
        let key = identity.unique_key().to_string();

        if let Some(backend) = &self.lock_backend {
            if self.probe.lease_backend_available(backend.as_ref(), &key).await {
                match LeaseElector::start(identity.clone(), self.holder.clone(), timing, backend.clone())
                    .await
                {
                    Ok(elector) => {
                        tracing::info!(key = %key, backend = backend.kind(), "Use lease leader elector");
                        return Ok(Elector {
                            strategy: Strategy::Lease(elector),
                        });
                    }
                    Err(e) => {
                        tracing::info!(
                            key = %key,
                            reason = e.reason(),
                            error = %e,
                            "Could not initialize lease leader elector"
                        );
                    }
                }
            }
        }

        tracing::info!(key = %key, transport = self.membership.kind(), "Use membership view leader elector");
        let elector = ViewElector::start(identity, timing, self.membership.clone()).await?;
        Ok(Elector {
            strategy: Strategy::View(elector),
        })
    }
}
