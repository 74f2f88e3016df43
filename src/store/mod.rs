//! Persistence boundary for the subsystem.
//!
//! All state lives in a shared relational store keyed by integer
//! identifiers. The traits here are the narrow interface the services
//! consume; `PgStore` is the production implementation and `MemoryStore`
//! backs the test suite and embedded use.

pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AccessResult;
use crate::types::{Capabilities, Module, PermissionMatrix};
use self::models::{
    ApprovalRequest, NewApprovalRequest, PermissionEntry, RequestFilter, RequestStatus, Role,
    RoleAssignment,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Role definitions, the (role, module) permission matrix, and user-role
/// assignments. Mutated only through `RoleService`.
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Insert a role; `Conflict` if the name is taken (case-sensitive)
    async fn insert_role(
        &self,
        name: &str,
        description: Option<&str>,
        is_system: bool,
    ) -> AccessResult<Role>;

    async fn fetch_role(&self, role_id: i64) -> AccessResult<Option<Role>>;

    async fn fetch_role_by_name(&self, name: &str) -> AccessResult<Option<Role>>;

    async fn list_roles(&self) -> AccessResult<Vec<Role>>;

    async fn set_role_active(&self, role_id: i64, active: bool) -> AccessResult<Role>;

    /// Delete a role together with its permission entries and assignments.
    /// The system-role guard lives in the service layer.
    async fn delete_role(&self, role_id: i64) -> AccessResult<()>;

    /// Upsert the single entry for (role, module)
    async fn upsert_permission(
        &self,
        role_id: i64,
        module: Module,
        capabilities: Capabilities,
    ) -> AccessResult<PermissionEntry>;

    async fn role_permissions(&self, role_id: i64) -> AccessResult<Vec<PermissionEntry>>;

    /// Insert an assignment; `Conflict` if the (user, role) pair exists
    async fn insert_assignment(&self, user_id: i64, role_id: i64) -> AccessResult<RoleAssignment>;

    async fn delete_assignment(&self, user_id: i64, role_id: i64) -> AccessResult<()>;

    async fn user_assignments(&self, user_id: i64) -> AccessResult<Vec<RoleAssignment>>;

    /// OR-merge of every assigned role's entries, per module
    async fn effective_permissions(&self, user_id: i64) -> AccessResult<PermissionMatrix>;
}

/// Terminal transition applied to a pending request
#[derive(Debug, Clone)]
pub struct RequestTransition {
    pub status: RequestStatus,
    pub approver_id: i64,
    pub decided_at: DateTime<Utc>,
    pub rejection_reason: Option<String>,
}

/// Approval request rows. Mutated only through `ApprovalService::create`
/// and `ApprovalService::decide`, never by direct field edits, to preserve
/// the transition invariant.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn insert_request(&self, new: NewApprovalRequest) -> AccessResult<ApprovalRequest>;

    async fn fetch_request(&self, request_id: i64) -> AccessResult<Option<ApprovalRequest>>;

    /// Ordered by creation time ascending
    async fn list_requests(&self, filter: &RequestFilter) -> AccessResult<Vec<ApprovalRequest>>;

    /// Atomic conditional transition: succeeds only if the row is still
    /// pending at commit time, otherwise `Conflict`. On approval the
    /// subject effect is applied in the same transaction; a missing
    /// subject makes the effect a logged no-op.
    async fn transition_request(
        &self,
        request_id: i64,
        transition: RequestTransition,
    ) -> AccessResult<ApprovalRequest>;
}

/// Source of previously allocated serial values (the students table's
/// serial column in production).
#[async_trait]
pub trait SerialStore: Send + Sync {
    async fn existing_serials(&self) -> AccessResult<Vec<String>>;

    async fn serial_in_use(&self, serial: &str) -> AccessResult<bool>;
}
