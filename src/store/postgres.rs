//! Postgres store backend.
//!
//! All queries are runtime-checked (`sqlx::query`/`query_as`, no macros)
//! so the crate builds without a live database. The approval transition is
//! a conditional UPDATE keyed on the prior `pending` status, executed in
//! the same transaction as the subject effect.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, info, warn};

use crate::config;
use crate::error::{AccessError, AccessResult};
use crate::types::{Capabilities, Module, PermissionMatrix};

use super::models::{
    ApprovalRequest, NewApprovalRequest, PermissionEntry, RequestDetails, RequestFilter,
    RequestKind, RequestStatus, Role, RoleAssignment,
};
use super::{ApprovalStore, RequestTransition, RoleStore, SerialStore};

const REQUEST_COLUMNS: &str = "id, kind, subject_id, details, requested_by, status, reason, \
     approver_id, approved_at, rejection_reason, created_at, updated_at";

#[derive(Debug, FromRow)]
struct PermissionRow {
    id: i64,
    role_id: i64,
    module: String,
    can_view: bool,
    can_add: bool,
    can_edit: bool,
    can_delete: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PermissionRow {
    fn try_into_entry(self) -> AccessResult<PermissionEntry> {
        Ok(PermissionEntry {
            id: self.id,
            role_id: self.role_id,
            module: self.module.parse()?,
            capabilities: Capabilities {
                view: self.can_view,
                add: self.can_add,
                edit: self.can_edit,
                delete: self.can_delete,
            },
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RequestRow {
    id: i64,
    kind: String,
    subject_id: i64,
    details: serde_json::Value,
    requested_by: i64,
    status: String,
    reason: Option<String>,
    approver_id: Option<i64>,
    approved_at: Option<DateTime<Utc>>,
    rejection_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RequestRow {
    fn try_into_request(self) -> AccessResult<ApprovalRequest> {
        let kind: RequestKind = self.kind.parse()?;
        Ok(ApprovalRequest {
            id: self.id,
            kind,
            subject_id: self.subject_id,
            details: RequestDetails::from_parts(kind, self.details)?,
            requested_by: self.requested_by,
            status: self.status.parse()?,
            reason: self.reason,
            approver_id: self.approver_id,
            approved_at: self.approved_at,
            rejection_reason: self.rejection_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Map a unique-constraint violation to the taxonomy's `Conflict`;
/// everything else passes through as a database fault.
fn map_unique_violation(err: sqlx::Error, message: &str) -> AccessError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some("23505") {
            return AccessError::conflict(message);
        }
    }
    AccessError::Database(err)
}

/// Postgres implementation of the store traits
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with pool sizing from the application config
    pub async fn connect(database_url: &str) -> AccessResult<Self> {
        let db_config = &config::config().database;
        let pool = PgPoolOptions::new()
            .max_connections(db_config.max_connections)
            .acquire_timeout(Duration::from_secs(db_config.connection_timeout))
            .connect(database_url)
            .await?;
        info!("Connected access store pool to database");
        Ok(Self { pool })
    }

    /// Connect using DATABASE_URL, loading .env first if present
    pub async fn from_env() -> AccessResult<Self> {
        let _ = dotenvy::dotenv();
        let url = std::env::var("DATABASE_URL")
            .map_err(|_| AccessError::unavailable("DATABASE_URL is not set"))?;
        Self::connect(&url).await
    }

    /// Pings the pool to ensure connectivity
    pub async fn health_check(&self) -> AccessResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn apply_approve_effect(
        tx: &mut Transaction<'_, Postgres>,
        request: &ApprovalRequest,
    ) -> AccessResult<()> {
        match &request.details {
            RequestDetails::BatchExtension(ext) => {
                let result =
                    sqlx::query("UPDATE batches SET total_sessions = total_sessions + $2 WHERE id = $1")
                        .bind(request.subject_id)
                        .bind(ext.extra_sessions)
                        .execute(&mut **tx)
                        .await?;
                if result.rows_affected() == 0 {
                    warn!(
                        "Approved extension request {} for missing batch {}, skipping effect",
                        request.id, request.subject_id
                    );
                }
            }
            RequestDetails::Leave(leave) => {
                let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM students WHERE id = $1")
                    .bind(request.subject_id)
                    .fetch_optional(&mut **tx)
                    .await?;
                if exists.is_none() {
                    warn!(
                        "Approved leave request {} for missing student {}, skipping effect",
                        request.id, request.subject_id
                    );
                    return Ok(());
                }
                sqlx::query(
                    "UPDATE attendance SET leave_excused = TRUE \
                     WHERE student_id = $1 AND attended_on BETWEEN $2 AND $3",
                )
                .bind(request.subject_id)
                .bind(leave.start_date)
                .bind(leave.end_date)
                .execute(&mut **tx)
                .await?;
            }
            // The decision record is the artifact; the host applies the change
            RequestDetails::Change(_) => {}
        }
        Ok(())
    }
}

#[async_trait]
impl RoleStore for PgStore {
    async fn insert_role(
        &self,
        name: &str,
        description: Option<&str>,
        is_system: bool,
    ) -> AccessResult<Role> {
        sqlx::query_as::<_, Role>(
            "INSERT INTO roles (name, description, is_system, is_active) \
             VALUES ($1, $2, $3, TRUE) \
             RETURNING id, name, description, is_system, is_active, created_at, updated_at",
        )
        .bind(name)
        .bind(description)
        .bind(is_system)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, &format!("Role name already exists: {}", name)))
    }

    async fn fetch_role(&self, role_id: i64) -> AccessResult<Option<Role>> {
        let role = sqlx::query_as::<_, Role>(
            "SELECT id, name, description, is_system, is_active, created_at, updated_at \
             FROM roles WHERE id = $1",
        )
        .bind(role_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(role)
    }

    async fn fetch_role_by_name(&self, name: &str) -> AccessResult<Option<Role>> {
        let role = sqlx::query_as::<_, Role>(
            "SELECT id, name, description, is_system, is_active, created_at, updated_at \
             FROM roles WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(role)
    }

    async fn list_roles(&self) -> AccessResult<Vec<Role>> {
        let roles = sqlx::query_as::<_, Role>(
            "SELECT id, name, description, is_system, is_active, created_at, updated_at \
             FROM roles ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(roles)
    }

    async fn set_role_active(&self, role_id: i64, active: bool) -> AccessResult<Role> {
        sqlx::query_as::<_, Role>(
            "UPDATE roles SET is_active = $2, updated_at = now() WHERE id = $1 \
             RETURNING id, name, description, is_system, is_active, created_at, updated_at",
        )
        .bind(role_id)
        .bind(active)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AccessError::not_found(format!("Role not found: {}", role_id)))
    }

    async fn delete_role(&self, role_id: i64) -> AccessResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(role_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM user_roles WHERE role_id = $1")
            .bind(role_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(role_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AccessError::not_found(format!(
                "Role not found: {}",
                role_id
            )));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_permission(
        &self,
        role_id: i64,
        module: Module,
        capabilities: Capabilities,
    ) -> AccessResult<PermissionEntry> {
        if self.fetch_role(role_id).await?.is_none() {
            return Err(AccessError::not_found(format!(
                "Role not found: {}",
                role_id
            )));
        }
        let row = sqlx::query_as::<_, PermissionRow>(
            "INSERT INTO role_permissions \
                 (role_id, module, can_view, can_add, can_edit, can_delete) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (role_id, module) DO UPDATE SET \
                 can_view = EXCLUDED.can_view, \
                 can_add = EXCLUDED.can_add, \
                 can_edit = EXCLUDED.can_edit, \
                 can_delete = EXCLUDED.can_delete, \
                 updated_at = now() \
             RETURNING id, role_id, module, can_view, can_add, can_edit, can_delete, \
                 created_at, updated_at",
        )
        .bind(role_id)
        .bind(module.as_str())
        .bind(capabilities.view)
        .bind(capabilities.add)
        .bind(capabilities.edit)
        .bind(capabilities.delete)
        .fetch_one(&self.pool)
        .await?;
        row.try_into_entry()
    }

    async fn role_permissions(&self, role_id: i64) -> AccessResult<Vec<PermissionEntry>> {
        let rows = sqlx::query_as::<_, PermissionRow>(
            "SELECT id, role_id, module, can_view, can_add, can_edit, can_delete, \
                 created_at, updated_at \
             FROM role_permissions WHERE role_id = $1 ORDER BY module",
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PermissionRow::try_into_entry).collect()
    }

    async fn insert_assignment(&self, user_id: i64, role_id: i64) -> AccessResult<RoleAssignment> {
        if self.fetch_role(role_id).await?.is_none() {
            return Err(AccessError::not_found(format!(
                "Role not found: {}",
                role_id
            )));
        }
        sqlx::query_as::<_, RoleAssignment>(
            "INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2) \
             RETURNING id, user_id, role_id, created_at",
        )
        .bind(user_id)
        .bind(role_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            map_unique_violation(
                e,
                &format!("Role {} already assigned to user {}", role_id, user_id),
            )
        })
    }

    async fn delete_assignment(&self, user_id: i64, role_id: i64) -> AccessResult<()> {
        let result = sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2")
            .bind(user_id)
            .bind(role_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AccessError::not_found(format!(
                "Role {} is not assigned to user {}",
                role_id, user_id
            )));
        }
        Ok(())
    }

    async fn user_assignments(&self, user_id: i64) -> AccessResult<Vec<RoleAssignment>> {
        let assignments = sqlx::query_as::<_, RoleAssignment>(
            "SELECT id, user_id, role_id, created_at FROM user_roles \
             WHERE user_id = $1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(assignments)
    }

    async fn effective_permissions(&self, user_id: i64) -> AccessResult<PermissionMatrix> {
        // One joined read; each entry update is a single-row write, so a
        // concurrent writer yields either the old or the new entry, never a
        // torn value.
        let rows: Vec<(String, bool, bool, bool, bool)> = sqlx::query_as(
            "SELECT rp.module, \
                 bool_or(rp.can_view), bool_or(rp.can_add), \
                 bool_or(rp.can_edit), bool_or(rp.can_delete) \
             FROM role_permissions rp \
             JOIN user_roles ur ON ur.role_id = rp.role_id \
             WHERE ur.user_id = $1 \
             GROUP BY rp.module",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut matrix = PermissionMatrix::new();
        for (module, view, add, edit, delete) in rows {
            matrix.merge(
                module.parse()?,
                Capabilities {
                    view,
                    add,
                    edit,
                    delete,
                },
            );
        }
        Ok(matrix)
    }
}

#[async_trait]
impl ApprovalStore for PgStore {
    async fn insert_request(&self, new: NewApprovalRequest) -> AccessResult<ApprovalRequest> {
        let kind = new.details.kind();
        let details = new.details.to_value()?;
        let row = sqlx::query_as::<_, RequestRow>(&format!(
            "INSERT INTO approval_requests \
                 (kind, subject_id, details, requested_by, status, reason) \
             VALUES ($1, $2, $3, $4, 'pending', $5) \
             RETURNING {}",
            REQUEST_COLUMNS
        ))
        .bind(kind.as_str())
        .bind(new.subject_id)
        .bind(details)
        .bind(new.requested_by)
        .bind(new.reason)
        .fetch_one(&self.pool)
        .await?;
        row.try_into_request()
    }

    async fn fetch_request(&self, request_id: i64) -> AccessResult<Option<ApprovalRequest>> {
        let row = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {} FROM approval_requests WHERE id = $1",
            REQUEST_COLUMNS
        ))
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(RequestRow::try_into_request).transpose()
    }

    async fn list_requests(&self, filter: &RequestFilter) -> AccessResult<Vec<ApprovalRequest>> {
        // Build the WHERE clause from whichever filters are present
        let mut sql = format!("SELECT {} FROM approval_requests WHERE 1=1", REQUEST_COLUMNS);
        let mut position = 0;
        if filter.subject_id.is_some() {
            position += 1;
            sql.push_str(&format!(" AND subject_id = ${}", position));
        }
        if filter.kind.is_some() {
            position += 1;
            sql.push_str(&format!(" AND kind = ${}", position));
        }
        if filter.status.is_some() {
            position += 1;
            sql.push_str(&format!(" AND status = ${}", position));
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");

        let mut query = sqlx::query_as::<_, RequestRow>(&sql);
        if let Some(subject_id) = filter.subject_id {
            query = query.bind(subject_id);
        }
        if let Some(kind) = filter.kind {
            query = query.bind(kind.as_str());
        }
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(RequestRow::try_into_request).collect()
    }

    async fn transition_request(
        &self,
        request_id: i64,
        transition: RequestTransition,
    ) -> AccessResult<ApprovalRequest> {
        let mut tx = self.pool.begin().await?;

        // Conditional update: the transition only succeeds if the row is
        // still pending at commit time. Two racing deciders cannot both
        // match the WHERE clause.
        let row = sqlx::query_as::<_, RequestRow>(&format!(
            "UPDATE approval_requests \
             SET status = $2, approver_id = $3, approved_at = $4, \
                 rejection_reason = $5, updated_at = $4 \
             WHERE id = $1 AND status = 'pending' \
             RETURNING {}",
            REQUEST_COLUMNS
        ))
        .bind(request_id)
        .bind(transition.status.as_str())
        .bind(transition.approver_id)
        .bind(transition.decided_at)
        .bind(transition.rejection_reason.clone())
        .fetch_optional(&mut *tx)
        .await?;

        let row = match row {
            Some(row) => row,
            None => {
                // Distinguish an already-decided request from a missing one
                let existing: Option<(String,)> =
                    sqlx::query_as("SELECT status FROM approval_requests WHERE id = $1")
                        .bind(request_id)
                        .fetch_optional(&mut *tx)
                        .await?;
                return match existing {
                    Some(_) => Err(AccessError::conflict(format!(
                        "Approval request {} already decided",
                        request_id
                    ))),
                    None => Err(AccessError::not_found(format!(
                        "Approval request not found: {}",
                        request_id
                    ))),
                };
            }
        };

        let request = row.try_into_request()?;
        if request.status == RequestStatus::Approved {
            Self::apply_approve_effect(&mut tx, &request).await?;
        }
        tx.commit().await?;

        debug!(
            "Request {} transitioned to {} by user {}",
            request.id, request.status, transition.approver_id
        );
        Ok(request)
    }
}

#[async_trait]
impl SerialStore for PgStore {
    async fn existing_serials(&self) -> AccessResult<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT serial FROM students WHERE serial IS NOT NULL")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(serial,)| serial).collect())
    }

    async fn serial_in_use(&self, serial: &str) -> AccessResult<bool> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM students WHERE serial = $1")
            .bind(serial)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 > 0)
    }
}
