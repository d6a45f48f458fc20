//! Shared leader/follower state.

use helmsman_common::{LeaderRole, RoleTransition};
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::broadcast;

/// Capacity of the transition channel; slow subscribers see `Lagged`
const TRANSITION_CHANNEL_CAPACITY: usize = 16;

/// Current role of one elector.
///
/// Written only by the elector's tick loop, read by any number of callers.
/// The role is a single atomic byte, so readers never block and never see a
/// partially written value.
#[derive(Debug)]
pub struct ElectionState {
    /// Election key, for log fields
    key: String,
    role: AtomicU8,
    transitions: broadcast::Sender<RoleTransition>,
}

impl ElectionState {
    /// Create a new state in the `Unknown` role
    pub fn new(key: impl Into<String>) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            key: key.into(),
            role: AtomicU8::new(LeaderRole::Unknown.as_u8()),
            transitions,
        }
    }

    pub fn role(&self) -> LeaderRole {
        LeaderRole::from_u8(self.role.load(Ordering::Acquire))
    }

    pub fn is_leader(&self) -> bool {
        self.role().is_leader()
    }

    /// Receive every subsequent role change
    pub fn subscribe(&self) -> broadcast::Receiver<RoleTransition> {
        self.transitions.subscribe()
    }

    /// Move to `role`, logging and publishing the change.
    ///
    /// `detail` names what the decision was based on (holder, local address).
    /// Returns true if the role changed.
    pub fn set(&self, role: LeaderRole, detail: Option<&str>) -> bool {
        let previous = LeaderRole::from_u8(self.role.swap(role.as_u8(), Ordering::AcqRel));
        if previous == role {
            return false;
        }

        let detail = detail.unwrap_or("");
        match role {
            LeaderRole::Leader => {
                tracing::info!(key = %self.key, from = %previous, detail, "Took the lead");
            }
            LeaderRole::Follower => {
                tracing::info!(key = %self.key, from = %previous, detail, "Following another leader");
            }
            LeaderRole::Unknown => {
                tracing::warn!(key = %self.key, from = %previous, detail, "Lost contact, leadership unknown");
            }
        }

        // No subscribers is fine
        let _ = self.transitions.send(RoleTransition {
            from: previous,
            to: role,
        });

        true
    }

    /// Reset to `Unknown` once the elector has stopped
    pub fn clear(&self) {
        let previous = LeaderRole::from_u8(
            self.role
                .swap(LeaderRole::Unknown.as_u8(), Ordering::AcqRel),
        );
        tracing::info!(key = %self.key, from = %previous, "Election stopped");

        if previous != LeaderRole::Unknown {
            let _ = self.transitions.send(RoleTransition {
                from: previous,
                to: LeaderRole::Unknown,
            });
        }
    }
}
