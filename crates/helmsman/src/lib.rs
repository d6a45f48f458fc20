//! # Helmsman
//!
//! Answers "am I currently the leader?" for one process in a cluster, using
//! either a renewable lease in a shared lock store or the ordering of a live
//! membership view.
//!
//! ## Architecture
//! ```text
//! ElectorSelector ──probe──▶ LockBackend (Redis)
//!       │
//!       ├─ available ──▶ LeaseElector ──renew every retry_interval──▶ LockBackend
//!       └─ otherwise ──▶ ViewElector  ──view every retry_interval───▶ MembershipTransport (gossip)
//!                              │
//!                              ▼
//!                        ElectionState ◀── is_leader()
//! ```
//!
//! ```no_run
//! use std::sync::Arc;
//! use helmsman::{ElectionIdentity, ElectorSelector, StaticTransport};
//!
//! # async fn run() -> Result<(), helmsman::ElectionError> {
//! let selector = ElectorSelector::new("node-1", None, Arc::new(StaticTransport::single("node-1")));
//! let elector = selector
//!     .elect(ElectionIdentity::new("prod", "scheduler", ""), None)
//!     .await?;
//!
//! if elector.is_leader() {
//!     // run the singleton work
//! }
//! elector.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod lease;
pub mod selector;
pub mod state;
pub mod timing;
pub mod view;

pub use helmsman_common::{ElectionError, ElectionIdentity, LeaderRole, LeaseRecord, RoleTransition};
pub use lease::{LeaseElector, LockBackend, MemoryLockBackend, RedisLockBackend};
pub use selector::{AvailabilityProbe, Elector, ElectorSelector, EnvironmentProbe};
pub use state::ElectionState;
pub use timing::ElectionTiming;
pub use view::{GossipConfig, GossipTransport, MembershipHandle, MembershipTransport, StaticTransport, ViewElector};
