use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::error::{AccessError, AccessResult};
use crate::principal::Principal;
use crate::store::models::{
    ApprovalRequest, Decision, NewApprovalRequest, RequestDetails, RequestFilter, RequestStatus,
};
use crate::store::{ApprovalStore, RequestTransition};
use crate::types::{Action, Module};

use super::{audit, AuthzService};

/// Approval workflow engine: one state machine shared by every request
/// kind. Requests are mutated only through `create` and `decide`; the
/// pending gate on `decide` is enforced by the store as an atomic
/// conditional update, so two racing deciders cannot both succeed.
pub struct ApprovalService {
    store: Arc<dyn ApprovalStore>,
    authz: AuthzService,
}

impl ApprovalService {
    pub fn new(store: Arc<dyn ApprovalStore>, authz: AuthzService) -> Self {
        Self { store, authz }
    }

    /// File a new request. The requester must hold `add` on the kind's
    /// governing module, or be the subject itself for self-service kinds.
    pub async fn create(
        &self,
        principal: &Principal,
        subject_id: i64,
        details: RequestDetails,
        reason: Option<String>,
    ) -> AccessResult<ApprovalRequest> {
        details.validate()?;
        let kind = details.kind();
        let self_service = kind.is_self_service() && principal.user_id == subject_id;
        if !self_service {
            self.authz
                .authorize(principal, kind.module(), Action::Add)
                .await?;
        }

        let request = self
            .store
            .insert_request(NewApprovalRequest {
                subject_id,
                requested_by: principal.user_id,
                details,
                reason,
            })
            .await?;
        info!(
            "User {} filed {} request {} for subject {}",
            principal.user_id, request.kind, request.id, subject_id
        );
        audit(format!(
            "user {} created {} request {}",
            principal.user_id, request.kind, request.id
        ));
        Ok(request)
    }

    /// Approve or reject a pending request. Exactly one decide call ever
    /// succeeds per request; later calls observe `Conflict`. The subject
    /// effect is applied by the store in the same transaction as the
    /// status transition, and only on approval.
    pub async fn decide(
        &self,
        principal: &Principal,
        request_id: i64,
        decision: Decision,
        rejection_reason: Option<String>,
    ) -> AccessResult<ApprovalRequest> {
        let rejection_reason = match decision {
            Decision::Approve => None,
            Decision::Reject => Some(
                rejection_reason
                    .filter(|r| !r.trim().is_empty())
                    .ok_or_else(|| AccessError::validation("Rejection requires a reason"))?,
            ),
        };

        let request = self.store.fetch_request(request_id).await?.ok_or_else(|| {
            AccessError::not_found(format!("Approval request not found: {}", request_id))
        })?;
        // Holds for every kind, including requests filed by an entity on
        // behalf of itself
        if request.requested_by == principal.user_id {
            return Err(AccessError::forbidden(
                "Requester may not decide their own request",
            ));
        }
        self.authz
            .authorize(principal, Module::Approvals, Action::Edit)
            .await?;

        let status = match decision {
            Decision::Approve => RequestStatus::Approved,
            Decision::Reject => RequestStatus::Rejected,
        };
        let updated = self
            .store
            .transition_request(
                request_id,
                RequestTransition {
                    status,
                    approver_id: principal.user_id,
                    decided_at: Utc::now(),
                    rejection_reason,
                },
            )
            .await?;
        info!(
            "User {} decided request {}: {}",
            principal.user_id, request_id, updated.status
        );
        audit(format!(
            "user {} set request {} to {}",
            principal.user_id, request_id, updated.status
        ));
        Ok(updated)
    }

    pub async fn get(&self, request_id: i64) -> AccessResult<ApprovalRequest> {
        self.store.fetch_request(request_id).await?.ok_or_else(|| {
            AccessError::not_found(format!("Approval request not found: {}", request_id))
        })
    }

    /// Requests matching the filter, ordered by creation time ascending
    pub async fn list(&self, filter: RequestFilter) -> AccessResult<Vec<ApprovalRequest>> {
        self.store.list_requests(&filter).await
    }
}
