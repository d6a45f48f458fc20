//! Core types shared across Helmsman components.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one contender in an election.
///
/// The unique key joins the non-blank parts with `.` and names both the
/// lease record and the membership group:
///
/// - `("prod", "scheduler", "node-1")` -> `prod.scheduler.node-1`
/// - `("", "scheduler", "node-1")` -> `scheduler.node-1`
/// - `("", "", "")` -> empty key (single-process use)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "IdentityParts", into = "IdentityParts")]
pub struct ElectionIdentity {
    namespace: String,
    name: String,
    identity: String,
    unique_key: String,
}

#[derive(Serialize, Deserialize)]
struct IdentityParts {
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    identity: String,
}

impl ElectionIdentity {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        identity: impl Into<String>,
    ) -> Self {
        let namespace = namespace.into();
        let name = name.into();
        let identity = identity.into();
        let unique_key = [&namespace, &name, &identity]
            .into_iter()
            .filter(|part| !part.trim().is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(".");

        Self {
            namespace,
            name,
            identity,
            unique_key,
        }
    }

    /// Identity with only the instance part set
    pub fn from_identity(identity: impl Into<String>) -> Self {
        Self::new("", "", identity)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn unique_key(&self) -> &str {
        &self.unique_key
    }
}

impl From<IdentityParts> for ElectionIdentity {
    fn from(parts: IdentityParts) -> Self {
        Self::new(parts.namespace, parts.name, parts.identity)
    }
}

impl From<ElectionIdentity> for IdentityParts {
    fn from(identity: ElectionIdentity) -> Self {
        Self {
            namespace: identity.namespace,
            name: identity.name,
            identity: identity.identity,
        }
    }
}

impl fmt::Display for ElectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[namespace={}, name={}, identity={}]",
            self.namespace, self.name, self.identity
        )
    }
}

/// Role of this process in an election
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LeaderRole {
    /// No answer yet, or contact with the backend lost
    Unknown = 0,
    /// This process holds leadership
    Leader = 1,
    /// Another process holds leadership
    Follower = 2,
}

impl LeaderRole {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode a stored role; anything unrecognised reads as `Unknown`
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Leader,
            2 => Self::Follower,
            _ => Self::Unknown,
        }
    }

    pub fn is_leader(self) -> bool {
        self == Self::Leader
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Leader => "leader",
            Self::Follower => "follower",
        }
    }
}

impl Default for LeaderRole {
    fn default() -> Self {
        Self::Unknown
    }
}

impl fmt::Display for LeaderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change of role published by an elector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleTransition {
    pub from: LeaderRole,
    pub to: LeaderRole,
}

/// Lock record as stored by a lease backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    /// Identity of the current holder
    pub holder: String,
    /// Last acquire/renew (unix millis)
    pub renewed_at_ms: i64,
    /// Lease expiry (unix millis)
    pub expires_at_ms: i64,
}

impl LeaseRecord {
    /// Record for a lease taken or renewed now
    pub fn new(holder: impl Into<String>, ttl_ms: u64) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            holder: holder.into(),
            renewed_at_ms: now,
            expires_at_ms: now.saturating_add(ttl_ms as i64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_key_joins_non_blank_parts() {
        assert_eq!(
            ElectionIdentity::new("prod", "scheduler", "node-1").unique_key(),
            "prod.scheduler.node-1"
        );
        assert_eq!(
            ElectionIdentity::new("", "scheduler", "node-1").unique_key(),
            "scheduler.node-1"
        );
        assert_eq!(
            ElectionIdentity::new("prod", "  ", "node-1").unique_key(),
            "prod.node-1"
        );
        assert_eq!(ElectionIdentity::from_identity("node-1").unique_key(), "node-1");
    }

    #[test]
    fn test_all_blank_identity_has_empty_key() {
        let identity = ElectionIdentity::new(" ", "", "\t");
        assert_eq!(identity.unique_key(), "");
    }

    #[test]
    fn test_identity_deserialize_derives_key() {
        let identity: ElectionIdentity =
            serde_json::from_str(r#"{"namespace":"ns","identity":"a"}"#).unwrap();
        assert_eq!(identity.name(), "");
        assert_eq!(identity.unique_key(), "ns.a");

        let json = serde_json::to_value(&identity).unwrap();
        assert!(json.get("unique_key").is_none());
    }

    #[test]
    fn test_role_round_trip_through_u8() {
        for role in [LeaderRole::Unknown, LeaderRole::Leader, LeaderRole::Follower] {
            assert_eq!(LeaderRole::from_u8(role.as_u8()), role);
        }
        assert_eq!(LeaderRole::from_u8(42), LeaderRole::Unknown);
        assert!(LeaderRole::Leader.is_leader());
        assert!(!LeaderRole::Follower.is_leader());
        assert!(!LeaderRole::Unknown.is_leader());
    }

    #[test]
    fn test_lease_record_expiry() {
        let record = LeaseRecord::new("node-1", 60_000);
        assert_eq!(record.holder, "node-1");
        assert_eq!(record.expires_at_ms - record.renewed_at_ms, 60_000);
    }
}
