//! Authorization primitives for the pipeline surfaces.
//!
//! Roles map to permissions through a static table. Role lookups go through an
//! injected [`RoleCache`] so the gate holds no process-global state.

mod cache;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub use cache::{RoleCache, TtlCache};

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("permission {permission} denied for user {user_id}")]
    Denied { user_id: Uuid, permission: Permission },
    #[error("role lookup failed: {0}")]
    Lookup(String),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    DealsRead,
    DealsWrite,
    DealsManageFunnels,
    BuyersRead,
    BuyersWrite,
    BuyersManageFunnels,
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::DealsRead => "DEALS_READ",
            Permission::DealsWrite => "DEALS_WRITE",
            Permission::DealsManageFunnels => "DEALS_MANAGE_FUNNELS",
            Permission::BuyersRead => "BUYERS_READ",
            Permission::BuyersWrite => "BUYERS_WRITE",
            Permission::BuyersManageFunnels => "BUYERS_MANAGE_FUNNELS",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    SalesHead,
    SalesExecutor,
    Viewer,
}

const ALL_PERMISSIONS: &[Permission] = &[
    Permission::DealsRead,
    Permission::DealsWrite,
    Permission::DealsManageFunnels,
    Permission::BuyersRead,
    Permission::BuyersWrite,
    Permission::BuyersManageFunnels,
];

const EXECUTOR_PERMISSIONS: &[Permission] = &[
    Permission::DealsRead,
    Permission::DealsWrite,
    Permission::BuyersRead,
    Permission::BuyersWrite,
];

const VIEWER_PERMISSIONS: &[Permission] = &[Permission::DealsRead, Permission::BuyersRead];

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::SalesHead => "SALES_HEAD",
            Role::SalesExecutor => "SALES_EXECUTOR",
            Role::Viewer => "VIEWER",
        }
    }

    pub fn from_key(value: &str) -> Option<Self> {
        match value {
            "ADMIN" => Some(Role::Admin),
            "SALES_HEAD" => Some(Role::SalesHead),
            "SALES_EXECUTOR" => Some(Role::SalesExecutor),
            "VIEWER" => Some(Role::Viewer),
            _ => None,
        }
    }

    pub fn permissions(self) -> &'static [Permission] {
        match self {
            Role::Admin | Role::SalesHead => ALL_PERMISSIONS,
            Role::SalesExecutor => EXECUTOR_PERMISSIONS,
            Role::Viewer => VIEWER_PERMISSIONS,
        }
    }

    pub fn grants(self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }
}

/// Where the gate reads a user's roles from on a cache miss.
#[async_trait]
pub trait RoleSource: Send + Sync {
    async fn roles_of(&self, user_id: Uuid) -> Result<Vec<Role>, AuthzError>;
}

pub struct PermissionGate {
    source: Arc<dyn RoleSource>,
    cache: Arc<dyn RoleCache>,
}

impl PermissionGate {
    pub fn new(source: Arc<dyn RoleSource>, cache: Arc<dyn RoleCache>) -> Self {
        Self { source, cache }
    }

    pub async fn roles_for(&self, user_id: Uuid) -> Result<Vec<Role>, AuthzError> {
        if let Some(roles) = self.cache.get(&user_id) {
            return Ok(roles);
        }
        let roles = self.source.roles_of(user_id).await?;
        self.cache.set(user_id, roles.clone());
        Ok(roles)
    }

    pub async fn check(&self, user_id: Uuid, permission: Permission) -> Result<(), AuthzError> {
        let roles = self.roles_for(user_id).await?;
        if roles.iter().any(|role| role.grants(permission)) {
            debug!(%user_id, %permission, "permission granted");
            Ok(())
        } else {
            Err(AuthzError::Denied {
                user_id,
                permission,
            })
        }
    }

    /// Drop cached roles, e.g. after a role assignment changed.
    pub fn invalidate(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingSource {
        roles: Vec<Role>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RoleSource for CountingSource {
        async fn roles_of(&self, _user_id: Uuid) -> Result<Vec<Role>, AuthzError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.roles.clone())
        }
    }

    fn gate(roles: Vec<Role>, ttl: Duration) -> (PermissionGate, Arc<CountingSource>) {
        let source = Arc::new(CountingSource {
            roles,
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(TtlCache::new(16, ttl));
        (PermissionGate::new(source.clone(), cache), source)
    }

    #[test]
    fn role_table_grants() {
        assert!(Role::Admin.grants(Permission::BuyersManageFunnels));
        assert!(Role::SalesExecutor.grants(Permission::DealsWrite));
        assert!(!Role::SalesExecutor.grants(Permission::DealsManageFunnels));
        assert!(!Role::Viewer.grants(Permission::BuyersWrite));
        assert_eq!(Role::from_key("SALES_HEAD"), Some(Role::SalesHead));
        assert_eq!(Role::from_key("nobody"), None);
    }

    #[tokio::test]
    async fn viewer_cannot_write() {
        let (gate, _) = gate(vec![Role::Viewer], Duration::from_secs(5));
        let user = Uuid::new_v4();
        gate.check(user, Permission::DealsRead).await.unwrap();
        let err = gate.check(user, Permission::DealsWrite).await.unwrap_err();
        assert!(matches!(err, AuthzError::Denied { permission: Permission::DealsWrite, .. }));
    }

    #[tokio::test]
    async fn role_lookups_are_cached() {
        let (gate, source) = gate(vec![Role::SalesExecutor], Duration::from_secs(60));
        let user = Uuid::new_v4();
        gate.check(user, Permission::BuyersRead).await.unwrap();
        gate.check(user, Permission::BuyersWrite).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        gate.invalidate();
        gate.check(user, Permission::BuyersRead).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }
}
