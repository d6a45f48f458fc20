//! Membership-view election.
//!
//! Every member of a group sees the same ordered view; the first member of
//! the view leads. Implements:
//! - The membership transport capability (`MembershipTransport`)
//! - UDP gossip membership (oldest live member first)
//! - A fixed view for single-node deployments
//! - The view-inspecting elector

mod elector;
mod fixed;
mod gossip;

pub use self::elector::ViewElector;
pub use self::fixed::StaticTransport;
pub use self::gossip::{GossipConfig, GossipPacket, GossipTransport};

use async_trait::async_trait;
use helmsman_common::ElectionError;

/// Address of a group member as reported by a transport
pub type MemberAddress = String;

/// Joins named groups.
#[async_trait]
pub trait MembershipTransport: Send + Sync {
    /// Stable label for log fields (`"gossip"`, `"static"`)
    fn kind(&self) -> &'static str;

    /// Join `group`, returning a handle to its live view
    async fn join(&self, group: &str) -> Result<Box<dyn MembershipHandle>, ElectionError>;
}

/// Membership in one group.
///
/// The view order MUST be canonical: every member observing the same set of
/// members returns them in the same order.
#[async_trait]
pub trait MembershipHandle: Send + Sync {
    /// This member's address, as it appears in the view
    fn local_address(&self) -> &str;

    /// Currently reachable members, in canonical order
    async fn current_view(&self) -> Result<Vec<MemberAddress>, ElectionError>;

    /// Leave the group; the handle is unusable afterwards
    async fn leave(&self);
}
