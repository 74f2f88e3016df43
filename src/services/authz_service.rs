use std::sync::Arc;

use tracing::debug;

use crate::error::{AccessError, AccessResult};
use crate::principal::Principal;
use crate::store::RoleStore;
use crate::types::{Action, Module, PermissionMatrix};

/// Authorization decision engine.
///
/// Every decision is a pure function of current persisted state: no
/// caching across requests, so there is nothing to invalidate when the
/// role/permission tables change. Calls are side-effect-free and safe to
/// repeat for the same inputs.
#[derive(Clone)]
pub struct AuthzService {
    store: Arc<dyn RoleStore>,
}

impl AuthzService {
    pub fn new(store: Arc<dyn RoleStore>) -> Self {
        Self { store }
    }

    /// Can this principal perform `action` on `module`?
    /// Superadmin principals bypass the matrix entirely.
    pub async fn check(
        &self,
        principal: &Principal,
        module: Module,
        action: Action,
    ) -> AccessResult<bool> {
        if principal.is_superadmin() {
            return Ok(true);
        }
        let matrix = self.store.effective_permissions(principal.user_id).await?;
        Ok(matrix.allows(module, action))
    }

    /// `check` that fails with `Forbidden` on deny
    pub async fn authorize(
        &self,
        principal: &Principal,
        module: Module,
        action: Action,
    ) -> AccessResult<()> {
        if self.check(principal, module, action).await? {
            return Ok(());
        }
        debug!(
            "Denied user {}: {} on {}",
            principal.user_id, action, module
        );
        Err(AccessError::forbidden(format!(
            "User {} lacks {} capability on {}",
            principal.user_id, action, module
        )))
    }

    /// OR-merge of the user's assigned roles' entries, per module
    pub async fn effective_permissions(&self, user_id: i64) -> AccessResult<PermissionMatrix> {
        self.store.effective_permissions(user_id).await
    }
}
