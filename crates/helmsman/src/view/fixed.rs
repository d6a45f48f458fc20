//! Fixed membership view.

use async_trait::async_trait;
use helmsman_common::ElectionError;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{MemberAddress, MembershipHandle, MembershipTransport};

/// Transport whose view is set by the caller.
///
/// With a view of just the local address it makes a single node its own
/// leader; the view can be replaced at runtime with `set_view`.
#[derive(Debug, Clone)]
pub struct StaticTransport {
    local: MemberAddress,
    view: Arc<RwLock<Vec<MemberAddress>>>,
    joined: Arc<RwLock<HashSet<String>>>,
}

impl StaticTransport {
    pub fn new(local: impl Into<MemberAddress>, view: Vec<MemberAddress>) -> Self {
        Self {
            local: local.into(),
            view: Arc::new(RwLock::new(view)),
            joined: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// A group of one: the local member always leads
    pub fn single(local: impl Into<MemberAddress>) -> Self {
        let local = local.into();
        Self::new(local.clone(), vec![local])
    }

    /// Replace the view seen by every handle
    pub async fn set_view(&self, view: Vec<MemberAddress>) {
        *self.view.write().await = view;
    }

    /// Is some handle currently joined to `group`?
    pub async fn is_joined(&self, group: &str) -> bool {
        self.joined.read().await.contains(group)
    }
}

struct StaticHandle {
    group: String,
    transport: StaticTransport,
}

#[async_trait]
impl MembershipTransport for StaticTransport {
    fn kind(&self) -> &'static str {
        "static"
    }

    async fn join(&self, group: &str) -> Result<Box<dyn MembershipHandle>, ElectionError> {
        self.joined.write().await.insert(group.to_string());
        Ok(Box::new(StaticHandle {
            group: group.to_string(),
            transport: self.clone(),
        }))
    }
}

#[async_trait]
impl MembershipHandle for StaticHandle {
    fn local_address(&self) -> &str {
        &self.transport.local
    }

    async fn current_view(&self) -> Result<Vec<MemberAddress>, ElectionError> {
        if !self.transport.is_joined(&self.group).await {
            return Err(ElectionError::BackendUnavailable(format!(
                "not joined to group {}",
                self.group
            )));
        }
        Ok(self.transport.view.read().await.clone())
    }

    async fn leave(&self) {
        self.transport.joined.write().await.remove(&self.group);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_view_follows_set_view() {
        let transport = StaticTransport::new("a", vec!["a".into(), "b".into()]);
        let handle = transport.join("group").await.unwrap();

        assert_eq!(handle.local_address(), "a");
        assert_eq!(handle.current_view().await.unwrap(), vec!["a", "b"]);

        transport.set_view(vec!["b".into(), "a".into()]).await;
        assert_eq!(handle.current_view().await.unwrap(), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_leave_drops_membership() {
        let transport = StaticTransport::single("a");
        let handle = transport.join("group").await.unwrap();
        assert!(transport.is_joined("group").await);

        handle.leave().await;
        assert!(!transport.is_joined("group").await);
        assert!(handle.current_view().await.is_err());
    }
}
