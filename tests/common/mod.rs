use std::sync::Arc;

use anyhow::Result;

use academy_access::principal::{Principal, ADMIN_ROLE, SUPERADMIN_ROLE};
use academy_access::services::{ApprovalService, AuthzService, RoleService, SerialService};
use academy_access::store::MemoryStore;

/// Full service stack over one shared in-memory store
pub struct TestStack {
    pub store: Arc<MemoryStore>,
    pub roles: RoleService,
    pub authz: AuthzService,
    pub approvals: Arc<ApprovalService>,
    pub serials: SerialService,
}

pub fn stack() -> TestStack {
    // Keeps output tidy; later calls are a no-op
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let store = Arc::new(MemoryStore::new());
    let authz = AuthzService::new(store.clone());
    TestStack {
        roles: RoleService::new(store.clone(), authz.clone()),
        approvals: Arc::new(ApprovalService::new(store.clone(), authz.clone())),
        serials: SerialService::new(store.clone()),
        authz,
        store,
    }
}

pub fn superadmin(user_id: i64) -> Principal {
    Principal::new(user_id, vec![SUPERADMIN_ROLE.to_string()])
}

/// Seed the system roles and hand `user_id` the admin role
pub async fn seeded_admin(stack: &TestStack, user_id: i64) -> Result<Principal> {
    stack.roles.seed_system_roles().await?;
    let admin_role = stack
        .roles
        .list_roles()
        .await?
        .into_iter()
        .find(|r| r.name == ADMIN_ROLE)
        .expect("admin role seeded");
    stack
        .roles
        .assign_role(&superadmin(0), user_id, admin_role.id)
        .await?;
    Ok(Principal::new(user_id, vec![ADMIN_ROLE.to_string()]))
}
