//! Permission Requests — human approval for filesystem writes that policy
//! routes through the confirmation gate.
//!
//! A sibling of the intervention broker, scoped to local writes: the tool
//! router suspends on `confirm_write` until a human approves or denies via
//! the REST API, or the request times out and is rejected.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::oneshot;

use pandora_domain::error::{Error, Result, TimeoutKind};
use pandora_domain::ids::new_permission_id;
use pandora_tools::ConfirmGate;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
enum PermissionDecision {
    Approved,
    Denied,
}

struct PendingPermission {
    info: PermissionInfo,
    respond: oneshot::Sender<PermissionDecision>,
}

/// Serializable snapshot of a pending permission request.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionInfo {
    pub permission_id: String,
    pub profile: String,
    pub trace_id: String,
    pub tool: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Broker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PermissionBroker {
    pending: RwLock<HashMap<String, PendingPermission>>,
    ttl: Duration,
}

impl PermissionBroker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Resolve a pending request as approved. Returns `true` if found.
    pub fn approve(&self, permission_id: &str) -> bool {
        if let Some(pending) = self.pending.write().remove(permission_id) {
            let _ = pending.respond.send(PermissionDecision::Approved);
            tracing::info!(permission_id, "write permission approved");
            return true;
        }
        false
    }

    /// Resolve a pending request as denied. Returns `true` if found.
    pub fn deny(&self, permission_id: &str) -> bool {
        if let Some(pending) = self.pending.write().remove(permission_id) {
            let _ = pending.respond.send(PermissionDecision::Denied);
            tracing::info!(permission_id, "write permission denied");
            return true;
        }
        false
    }

    /// Pending requests for UI polling.
    pub fn list_pending(&self) -> Vec<PermissionInfo> {
        let mut infos: Vec<PermissionInfo> = self
            .pending
            .read()
            .values()
            .map(|p| p.info.clone())
            .collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    pub fn pending_count(&self) -> usize {
        self.pending.read().len()
    }
}

#[async_trait]
impl ConfirmGate for PermissionBroker {
    async fn confirm_write(
        &self,
        profile: &str,
        trace_id: &str,
        tool: &str,
        path: &Path,
    ) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        let permission_id = new_permission_id();
        let info = PermissionInfo {
            permission_id: permission_id.clone(),
            profile: profile.to_owned(),
            trace_id: trace_id.to_owned(),
            tool: tool.to_owned(),
            path: path.to_path_buf(),
            created_at: Utc::now(),
        };
        tracing::info!(
            %permission_id,
            tool,
            path = %path.display(),
            "write permission requested"
        );
        self.pending.write().insert(
            permission_id.clone(),
            PendingPermission { info, respond: tx },
        );

        match tokio::time::timeout(self.ttl, rx).await {
            Ok(Ok(PermissionDecision::Approved)) => Ok(true),
            Ok(Ok(PermissionDecision::Denied)) => Ok(false),
            // Sender dropped without a decision.
            Ok(Err(_)) => Ok(false),
            Err(_) => {
                self.pending.write().remove(&permission_id);
                tracing::info!(%permission_id, "write permission timed out");
                Err(Error::Timeout(TimeoutKind::Permission))
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn approve_unblocks_waiter() {
        let broker = Arc::new(PermissionBroker::new(Duration::from_secs(600)));
        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move {
                broker
                    .confirm_write("p", "tr_1", "fs.write", Path::new("/work/f.txt"))
                    .await
            })
        };

        // Wait until the request is listed.
        for _ in 0..100 {
            if broker.pending_count() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        let pending = broker.list_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].tool, "fs.write");

        assert!(broker.approve(&pending[0].permission_id));
        assert!(waiter.await.unwrap().unwrap());
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn deny_unblocks_with_false() {
        let broker = Arc::new(PermissionBroker::new(Duration::from_secs(600)));
        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move {
                broker
                    .confirm_write("p", "tr_1", "fs.write", Path::new("/work/f.txt"))
                    .await
            })
        };
        for _ in 0..100 {
            if broker.pending_count() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        let id = broker.list_pending()[0].permission_id.clone();
        assert!(broker.deny(&id));
        assert!(!waiter.await.unwrap().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_rejects_and_clears_pending() {
        let broker = Arc::new(PermissionBroker::new(Duration::from_secs(1)));
        let err = broker
            .confirm_write("p", "tr_1", "fs.write", Path::new("/work/f.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(TimeoutKind::Permission)));
        assert_eq!(broker.pending_count(), 0);
    }

    #[test]
    fn approve_unknown_returns_false() {
        let broker = PermissionBroker::new(Duration::from_secs(600));
        assert!(!broker.approve("perm_missing"));
        assert!(!broker.deny("perm_missing"));
    }
}
