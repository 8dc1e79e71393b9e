//! Garbage collection of state the host platform no longer backs.
//!
//! Run at startup and on demand. Never fails: every removal is counted and
//! the overall health is logged.

use chrono::Utc;
use convoke_capabilities::CapabilityRegistry;
use convoke_core::host::{HostPlatform, RoleId, ScopeId};
use convoke_memory::{ConversationStore, Db};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    pub capabilities_dropped: usize,
    pub scopes_removed: usize,
    pub role_overrides_removed: usize,
    pub blacklist_removed: usize,
    /// Idle conversations past their retention window. Routine, not an anomaly.
    pub conversations_expired: usize,
}

impl GcReport {
    pub fn anomalies(&self) -> usize {
        self.capabilities_dropped
            + self.scopes_removed
            + self.role_overrides_removed
            + self.blacklist_removed
    }

    /// Whether anything persistent was removed.
    pub fn changed(&self) -> bool {
        self.anomalies() > 0 || self.conversations_expired > 0
    }

    pub fn health(&self) -> &'static str {
        if self.anomalies() == 0 { "clean" } else { "cleaned" }
    }
}

pub async fn collect_garbage(
    db: &Arc<Db>,
    registry: &CapabilityRegistry,
    host: &dyn HostPlatform,
) -> GcReport {
    let mut report = GcReport {
        capabilities_dropped: registry.reconcile().await,
        ..Default::default()
    };

    let conversations = ConversationStore::new(db.clone());
    let now = Utc::now();

    for scope in db.scope_ids().await {
        if !host.scope_exists(scope).await {
            debug!(scope, "Removing scope unknown to the host");
            db.remove(scope).await;
            report.scopes_removed += 1;
            continue;
        }
        report.role_overrides_removed += clean_role_overrides(db, host, scope).await;
        report.blacklist_removed += clean_blacklist(db, host, scope).await;
        report.conversations_expired += conversations.expire_stale(scope, now).await;
    }

    info!(
        health = report.health(),
        capabilities = report.capabilities_dropped,
        scopes = report.scopes_removed,
        role_overrides = report.role_overrides_removed,
        blacklist = report.blacklist_removed,
        conversations = report.conversations_expired,
        "Scope state health"
    );
    report
}

async fn clean_role_overrides(db: &Db, host: &dyn HostPlatform, scope: ScopeId) -> usize {
    let Some(handle) = db.get(scope).await else {
        return 0;
    };
    let referenced: BTreeSet<RoleId> = {
        let conf = handle.read().await;
        conf.max_token_role_override
            .keys()
            .chain(conf.max_retention_role_override.keys())
            .chain(conf.max_time_role_override.keys())
            .chain(conf.model_role_overrides.keys())
            .copied()
            .collect()
    };

    let mut deleted = Vec::new();
    for role in referenced {
        if !host.role_exists(scope, role).await {
            deleted.push(role);
        }
    }
    if deleted.is_empty() {
        return 0;
    }

    let mut conf = handle.write().await;
    let mut removed = 0;
    for role in &deleted {
        removed += usize::from(conf.max_token_role_override.remove(role).is_some());
        removed += usize::from(conf.max_retention_role_override.remove(role).is_some());
        removed += usize::from(conf.max_time_role_override.remove(role).is_some());
        removed += usize::from(conf.model_role_overrides.remove(role).is_some());
    }
    debug!(scope, removed, "Removed overrides for deleted roles");
    removed
}

async fn clean_blacklist(db: &Db, host: &dyn HostPlatform, scope: ScopeId) -> usize {
    let Some(handle) = db.get(scope).await else {
        return 0;
    };
    let ids: Vec<u64> = handle.read().await.blacklist.iter().copied().collect();

    let mut stale = Vec::new();
    for id in ids {
        let known = host.role_exists(scope, id).await
            || host.actor_exists(scope, id).await
            || host.channel_exists(scope, id).await;
        if !known {
            stale.push(id);
        }
    }
    if stale.is_empty() {
        return 0;
    }

    let mut conf = handle.write().await;
    let removed = stale.iter().filter(|id| conf.blacklist.remove(*id)).count();
    debug!(scope, removed, "Removed stale blacklist entries");
    removed
}
