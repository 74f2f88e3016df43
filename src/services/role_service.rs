use std::sync::Arc;

use tracing::info;

use crate::error::{AccessError, AccessResult};
use crate::principal::{Principal, ADMIN_ROLE, SUPERADMIN_ROLE};
use crate::store::models::{PermissionEntry, Role, RoleAssignment};
use crate::store::RoleStore;
use crate::types::{Action, Capabilities, Module, PermissionMatrix};

use super::{audit, AuthzService};

/// Role definitions, the (role, module) permission matrix, and user-role
/// assignments. Every mutation runs through here; role administration
/// itself rides on the `users` module grant.
pub struct RoleService {
    store: Arc<dyn RoleStore>,
    authz: AuthzService,
}

impl RoleService {
    pub fn new(store: Arc<dyn RoleStore>, authz: AuthzService) -> Self {
        Self { store, authz }
    }

    async fn ensure_admin(&self, principal: &Principal, action: Action) -> AccessResult<()> {
        self.authz.authorize(principal, Module::Users, action).await
    }

    /// Create a role; `Conflict` if the name is taken (case-sensitive
    /// exact match)
    pub async fn create_role(
        &self,
        principal: &Principal,
        name: &str,
        description: Option<&str>,
    ) -> AccessResult<Role> {
        self.ensure_admin(principal, Action::Add).await?;
        let name = name.trim();
        if name.is_empty() {
            return Err(AccessError::validation("Role name must not be empty"));
        }
        let role = self.store.insert_role(name, description, false).await?;
        info!("Created role {} ({})", role.name, role.id);
        audit(format!(
            "user {} created role {}",
            principal.user_id, role.name
        ));
        Ok(role)
    }

    /// Upsert the single permission entry for (role, module)
    pub async fn set_permission(
        &self,
        principal: &Principal,
        role_id: i64,
        module: Module,
        capabilities: Capabilities,
    ) -> AccessResult<PermissionEntry> {
        self.ensure_admin(principal, Action::Edit).await?;
        let entry = self
            .store
            .upsert_permission(role_id, module, capabilities)
            .await?;
        audit(format!(
            "user {} set {} permissions on role {}",
            principal.user_id, module, role_id
        ));
        Ok(entry)
    }

    /// Delete a role and cascade its permission entries and assignments.
    /// System roles may never be deleted.
    pub async fn delete_role(&self, principal: &Principal, role_id: i64) -> AccessResult<()> {
        self.ensure_admin(principal, Action::Delete).await?;
        let role = self
            .store
            .fetch_role(role_id)
            .await?
            .ok_or_else(|| AccessError::not_found(format!("Role not found: {}", role_id)))?;
        if role.is_system {
            return Err(AccessError::forbidden(format!(
                "System role may not be deleted: {}",
                role.name
            )));
        }
        self.store.delete_role(role_id).await?;
        info!("Deleted role {} ({})", role.name, role_id);
        audit(format!(
            "user {} deleted role {}",
            principal.user_id, role.name
        ));
        Ok(())
    }

    /// Deactivation hides a role from new assignments without retracting
    /// already-granted access
    pub async fn set_role_active(
        &self,
        principal: &Principal,
        role_id: i64,
        active: bool,
    ) -> AccessResult<Role> {
        self.ensure_admin(principal, Action::Edit).await?;
        let role = self.store.set_role_active(role_id, active).await?;
        audit(format!(
            "user {} set role {} active={}",
            principal.user_id, role.name, active
        ));
        Ok(role)
    }

    pub async fn assign_role(
        &self,
        principal: &Principal,
        user_id: i64,
        role_id: i64,
    ) -> AccessResult<RoleAssignment> {
        self.ensure_admin(principal, Action::Edit).await?;
        let role = self
            .store
            .fetch_role(role_id)
            .await?
            .ok_or_else(|| AccessError::not_found(format!("Role not found: {}", role_id)))?;
        if !role.is_active {
            return Err(AccessError::validation(format!(
                "Inactive role may not be assigned: {}",
                role.name
            )));
        }
        let assignment = self.store.insert_assignment(user_id, role_id).await?;
        audit(format!(
            "user {} assigned role {} to user {}",
            principal.user_id, role.name, user_id
        ));
        Ok(assignment)
    }

    pub async fn unassign_role(
        &self,
        principal: &Principal,
        user_id: i64,
        role_id: i64,
    ) -> AccessResult<()> {
        self.ensure_admin(principal, Action::Edit).await?;
        self.store.delete_assignment(user_id, role_id).await?;
        audit(format!(
            "user {} unassigned role {} from user {}",
            principal.user_id, role_id, user_id
        ));
        Ok(())
    }

    pub async fn list_roles(&self) -> AccessResult<Vec<Role>> {
        self.store.list_roles().await
    }

    /// Permission entries granted to one role
    pub async fn role_permissions(&self, role_id: i64) -> AccessResult<Vec<PermissionEntry>> {
        self.store.role_permissions(role_id).await
    }

    /// Roles currently assigned to a user
    pub async fn user_roles(&self, user_id: i64) -> AccessResult<Vec<Role>> {
        let assignments = self.store.user_assignments(user_id).await?;
        let mut roles = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            if let Some(role) = self.store.fetch_role(assignment.role_id).await? {
                roles.push(role);
            }
        }
        Ok(roles)
    }

    pub async fn effective_permissions(&self, user_id: i64) -> AccessResult<PermissionMatrix> {
        self.store.effective_permissions(user_id).await
    }

    /// Idempotently create the seed system roles. The superadmin role
    /// bypasses the matrix and needs no entries; the admin role receives a
    /// full grant on every module.
    pub async fn seed_system_roles(&self) -> AccessResult<()> {
        if self.store.fetch_role_by_name(SUPERADMIN_ROLE).await?.is_none() {
            self.store
                .insert_role(SUPERADMIN_ROLE, Some("Unrestricted system role"), true)
                .await?;
            info!("Seeded role {}", SUPERADMIN_ROLE);
        }
        if self.store.fetch_role_by_name(ADMIN_ROLE).await?.is_none() {
            let admin = self
                .store
                .insert_role(ADMIN_ROLE, Some("Administrative system role"), true)
                .await?;
            for module in Module::ALL {
                self.store
                    .upsert_permission(admin.id, module, Capabilities::all())
                    .await?;
            }
            info!("Seeded role {}", ADMIN_ROLE);
        }
        Ok(())
    }
}
