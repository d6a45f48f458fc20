//! # Helmsman Common
//!
//! Shared types, errors, and constants used across Helmsman components.
//!
//! ## Modules
//! - `types` - Core data structures (ElectionIdentity, LeaderRole, LeaseRecord)
//! - `error` - The election error taxonomy
//! - `constants` - Shared defaults and key prefixes

pub mod constants;
pub mod error;
pub mod types;

pub use error::ElectionError;
pub use types::*;
