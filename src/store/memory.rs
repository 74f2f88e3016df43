//! In-process store backend.
//!
//! Backs the test suite and embedded use. A single `RwLock` covers all
//! tables; the compare-and-swap on `pending` happens under one write
//! lock, so two racing deciders can never both succeed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::{AccessError, AccessResult};
use crate::types::{Capabilities, Module, PermissionMatrix};

use super::models::{
    ApprovalRequest, NewApprovalRequest, PermissionEntry, RequestDetails, RequestFilter,
    RequestStatus, Role, RoleAssignment,
};
use super::{ApprovalStore, RequestTransition, RoleStore, SerialStore};

#[derive(Default)]
struct Tables {
    roles: BTreeMap<i64, Role>,
    permissions: Vec<PermissionEntry>,
    assignments: Vec<RoleAssignment>,
    requests: BTreeMap<i64, ApprovalRequest>,

    // Subject tables owned by the host system, modeled far enough to
    // observe approve effects
    batches: HashMap<i64, i32>,
    students: HashSet<i64>,
    excused_leaves: Vec<(i64, NaiveDate, NaiveDate)>,

    serials: Vec<String>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    serials_unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- host-owned subject tables, exposed for fixtures and assertions ----

    pub async fn insert_batch(&self, batch_id: i64, total_sessions: i32) {
        let mut tables = self.tables.write().await;
        tables.batches.insert(batch_id, total_sessions);
    }

    pub async fn batch_sessions(&self, batch_id: i64) -> Option<i32> {
        self.tables.read().await.batches.get(&batch_id).copied()
    }

    pub async fn remove_batch(&self, batch_id: i64) {
        self.tables.write().await.batches.remove(&batch_id);
    }

    pub async fn insert_student(&self, student_id: i64) {
        self.tables.write().await.students.insert(student_id);
    }

    pub async fn remove_student(&self, student_id: i64) {
        self.tables.write().await.students.remove(&student_id);
    }

    pub async fn excused_spans(&self, student_id: i64) -> Vec<(NaiveDate, NaiveDate)> {
        self.tables
            .read()
            .await
            .excused_leaves
            .iter()
            .filter(|(id, _, _)| *id == student_id)
            .map(|(_, start, end)| (*start, *end))
            .collect()
    }

    pub async fn insert_serial(&self, serial: &str) {
        self.tables.write().await.serials.push(serial.to_string());
    }

    /// Simulate the serial column being unreachable
    pub fn set_serials_unavailable(&self, unavailable: bool) {
        self.serials_unavailable
            .store(unavailable, Ordering::SeqCst);
    }

    fn apply_approve_effect(tables: &mut Tables, request: &ApprovalRequest) {
        match &request.details {
            RequestDetails::BatchExtension(ext) => {
                match tables.batches.get_mut(&request.subject_id) {
                    Some(total_sessions) => *total_sessions += ext.extra_sessions,
                    None => warn!(
                        "Approved extension request {} for missing batch {}, skipping effect",
                        request.id, request.subject_id
                    ),
                }
            }
            RequestDetails::Leave(leave) => {
                if tables.students.contains(&request.subject_id) {
                    tables.excused_leaves.push((
                        request.subject_id,
                        leave.start_date,
                        leave.end_date,
                    ));
                } else {
                    warn!(
                        "Approved leave request {} for missing student {}, skipping effect",
                        request.id, request.subject_id
                    );
                }
            }
            // The decision record is the artifact; the host applies the change
            RequestDetails::Change(_) => {}
        }
    }
}

#[async_trait]
impl RoleStore for MemoryStore {
    async fn insert_role(
        &self,
        name: &str,
        description: Option<&str>,
        is_system: bool,
    ) -> AccessResult<Role> {
        let mut tables = self.tables.write().await;
        if tables.roles.values().any(|r| r.name == name) {
            return Err(AccessError::conflict(format!(
                "Role name already exists: {}",
                name
            )));
        }
        let now = Utc::now();
        let role = Role {
            id: tables.next_id(),
            name: name.to_string(),
            description: description.map(str::to_string),
            is_system,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        tables.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn fetch_role(&self, role_id: i64) -> AccessResult<Option<Role>> {
        Ok(self.tables.read().await.roles.get(&role_id).cloned())
    }

    async fn fetch_role_by_name(&self, name: &str) -> AccessResult<Option<Role>> {
        Ok(self
            .tables
            .read()
            .await
            .roles
            .values()
            .find(|r| r.name == name)
            .cloned())
    }

    async fn list_roles(&self) -> AccessResult<Vec<Role>> {
        Ok(self.tables.read().await.roles.values().cloned().collect())
    }

    async fn set_role_active(&self, role_id: i64, active: bool) -> AccessResult<Role> {
        let mut tables = self.tables.write().await;
        let role = tables
            .roles
            .get_mut(&role_id)
            .ok_or_else(|| AccessError::not_found(format!("Role not found: {}", role_id)))?;
        role.is_active = active;
        role.updated_at = Utc::now();
        Ok(role.clone())
    }

    async fn delete_role(&self, role_id: i64) -> AccessResult<()> {
        let mut tables = self.tables.write().await;
        if tables.roles.remove(&role_id).is_none() {
            return Err(AccessError::not_found(format!(
                "Role not found: {}",
                role_id
            )));
        }
        tables.permissions.retain(|p| p.role_id != role_id);
        tables.assignments.retain(|a| a.role_id != role_id);
        Ok(())
    }

    async fn upsert_permission(
        &self,
        role_id: i64,
        module: Module,
        capabilities: Capabilities,
    ) -> AccessResult<PermissionEntry> {
        let mut tables = self.tables.write().await;
        if !tables.roles.contains_key(&role_id) {
            return Err(AccessError::not_found(format!(
                "Role not found: {}",
                role_id
            )));
        }
        let now = Utc::now();
        if let Some(entry) = tables
            .permissions
            .iter_mut()
            .find(|p| p.role_id == role_id && p.module == module)
        {
            entry.capabilities = capabilities;
            entry.updated_at = now;
            return Ok(entry.clone());
        }
        let entry = PermissionEntry {
            id: tables.next_id(),
            role_id,
            module,
            capabilities,
            created_at: now,
            updated_at: now,
        };
        tables.permissions.push(entry.clone());
        Ok(entry)
    }

    async fn role_permissions(&self, role_id: i64) -> AccessResult<Vec<PermissionEntry>> {
        Ok(self
            .tables
            .read()
            .await
            .permissions
            .iter()
            .filter(|p| p.role_id == role_id)
            .cloned()
            .collect())
    }

    async fn insert_assignment(&self, user_id: i64, role_id: i64) -> AccessResult<RoleAssignment> {
        let mut tables = self.tables.write().await;
        if !tables.roles.contains_key(&role_id) {
            return Err(AccessError::not_found(format!(
                "Role not found: {}",
                role_id
            )));
        }
        if tables
            .assignments
            .iter()
            .any(|a| a.user_id == user_id && a.role_id == role_id)
        {
            return Err(AccessError::conflict(format!(
                "Role {} already assigned to user {}",
                role_id, user_id
            )));
        }
        let assignment = RoleAssignment {
            id: tables.next_id(),
            user_id,
            role_id,
            created_at: Utc::now(),
        };
        tables.assignments.push(assignment.clone());
        Ok(assignment)
    }

    async fn delete_assignment(&self, user_id: i64, role_id: i64) -> AccessResult<()> {
        let mut tables = self.tables.write().await;
        let before = tables.assignments.len();
        tables
            .assignments
            .retain(|a| !(a.user_id == user_id && a.role_id == role_id));
        if tables.assignments.len() == before {
            return Err(AccessError::not_found(format!(
                "Role {} is not assigned to user {}",
                role_id, user_id
            )));
        }
        Ok(())
    }

    async fn user_assignments(&self, user_id: i64) -> AccessResult<Vec<RoleAssignment>> {
        Ok(self
            .tables
            .read()
            .await
            .assignments
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn effective_permissions(&self, user_id: i64) -> AccessResult<PermissionMatrix> {
        let tables = self.tables.read().await;
        let mut matrix = PermissionMatrix::new();
        for assignment in tables.assignments.iter().filter(|a| a.user_id == user_id) {
            for entry in tables
                .permissions
                .iter()
                .filter(|p| p.role_id == assignment.role_id)
            {
                matrix.merge(entry.module, entry.capabilities);
            }
        }
        Ok(matrix)
    }
}

#[async_trait]
impl ApprovalStore for MemoryStore {
    async fn insert_request(&self, new: NewApprovalRequest) -> AccessResult<ApprovalRequest> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let request = ApprovalRequest {
            id: tables.next_id(),
            kind: new.details.kind(),
            subject_id: new.subject_id,
            details: new.details,
            requested_by: new.requested_by,
            status: RequestStatus::Pending,
            reason: new.reason,
            approver_id: None,
            approved_at: None,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        };
        tables.requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn fetch_request(&self, request_id: i64) -> AccessResult<Option<ApprovalRequest>> {
        Ok(self.tables.read().await.requests.get(&request_id).cloned())
    }

    async fn list_requests(&self, filter: &RequestFilter) -> AccessResult<Vec<ApprovalRequest>> {
        let tables = self.tables.read().await;
        let mut requests: Vec<ApprovalRequest> = tables
            .requests
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        requests.sort_by_key(|r| (r.created_at, r.id));
        Ok(requests)
    }

    async fn transition_request(
        &self,
        request_id: i64,
        transition: RequestTransition,
    ) -> AccessResult<ApprovalRequest> {
        // Single write lock: check-and-set plus the subject effect are one
        // atomic step, mirroring the conditional UPDATE in the Postgres
        // backend.
        let mut tables = self.tables.write().await;
        let request = tables.requests.get(&request_id).cloned().ok_or_else(|| {
            AccessError::not_found(format!("Approval request not found: {}", request_id))
        })?;
        if request.status != RequestStatus::Pending {
            return Err(AccessError::conflict(format!(
                "Approval request {} already decided",
                request_id
            )));
        }

        let mut updated = request;
        updated.status = transition.status;
        updated.approver_id = Some(transition.approver_id);
        updated.approved_at = Some(transition.decided_at);
        updated.rejection_reason = transition.rejection_reason;
        updated.updated_at = transition.decided_at;

        if updated.status == RequestStatus::Approved {
            Self::apply_approve_effect(&mut tables, &updated);
        }
        tables.requests.insert(request_id, updated.clone());
        Ok(updated)
    }
}

#[async_trait]
impl SerialStore for MemoryStore {
    async fn existing_serials(&self) -> AccessResult<Vec<String>> {
        if self.serials_unavailable.load(Ordering::SeqCst) {
            return Err(AccessError::unavailable("Serial column unavailable"));
        }
        Ok(self.tables.read().await.serials.clone())
    }

    async fn serial_in_use(&self, serial: &str) -> AccessResult<bool> {
        if self.serials_unavailable.load(Ordering::SeqCst) {
            return Err(AccessError::unavailable("Serial column unavailable"));
        }
        Ok(self
            .tables
            .read()
            .await
            .serials
            .iter()
            .any(|s| s == serial))
    }
}
