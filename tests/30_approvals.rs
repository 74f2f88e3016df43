mod common;

use anyhow::Result;
use futures::future::join_all;

use academy_access::principal::Principal;
use academy_access::store::models::{
    Decision, ExtensionDetails, LeaveDetails, RequestDetails, RequestFilter, RequestKind,
    RequestStatus,
};
use academy_access::types::{Action, Capabilities, Module};

fn leave_details() -> RequestDetails {
    RequestDetails::Leave(LeaveDetails {
        start_date: "2026-04-06".parse().unwrap(),
        end_date: "2026-04-08".parse().unwrap(),
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_decides_yield_exactly_one_success() -> Result<()> {
    let stack = common::stack();
    stack.store.insert_student(42).await;
    let student = Principal::new(42, vec![]);
    let request = stack
        .approvals
        .create(&student, 42, leave_details(), None)
        .await?;

    let request_id = request.id;
    let mut tasks = Vec::new();
    for approver in 1..=8 {
        let approvals = stack.approvals.clone();
        let principal = common::superadmin(approver);
        tasks.push(tokio::spawn(async move {
            approvals
                .decide(&principal, request_id, Decision::Approve, None)
                .await
        }));
    }
    let outcomes: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.expect("decide task panicked"))
        .collect();

    let successes = outcomes.iter().filter(|o| o.is_ok()).count();
    let conflicts = outcomes
        .iter()
        .filter(|o| {
            o.as_ref()
                .err()
                .map_or(false, |e| e.error_code() == "CONFLICT")
        })
        .count();
    assert_eq!(successes, 1, "exactly one decider must win");
    assert_eq!(conflicts, outcomes.len() - 1);

    // The stored row reflects the single winner
    let decided = stack.approvals.get(request.id).await?;
    assert_eq!(decided.status, RequestStatus::Approved);
    assert!(decided.approver_id.is_some());
    Ok(())
}

#[tokio::test]
async fn reject_without_reason_is_validation_error() -> Result<()> {
    let stack = common::stack();
    stack.store.insert_student(42).await;
    let student = Principal::new(42, vec![]);
    let request = stack
        .approvals
        .create(&student, 42, leave_details(), None)
        .await?;

    for missing in [None, Some("   ".to_string())] {
        let err = stack
            .approvals
            .decide(&common::superadmin(1), request.id, Decision::Reject, missing)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }
    assert_eq!(
        stack.approvals.get(request.id).await?.status,
        RequestStatus::Pending
    );
    Ok(())
}

#[tokio::test]
async fn requester_cannot_be_approver() -> Result<()> {
    let stack = common::stack();
    stack.store.insert_student(42).await;
    // Even a superadmin requester may not decide their own request
    let student = common::superadmin(42);
    let request = stack
        .approvals
        .create(&student, 42, leave_details(), None)
        .await?;

    let err = stack
        .approvals
        .decide(&student, request.id, Decision::Approve, None)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "FORBIDDEN");
    Ok(())
}

#[tokio::test]
async fn approver_needs_edit_on_approvals_module() -> Result<()> {
    let stack = common::stack();
    let root = common::superadmin(1);
    stack.store.insert_student(42).await;
    let student = Principal::new(42, vec![]);
    let request = stack
        .approvals
        .create(&student, 42, leave_details(), None)
        .await?;

    let outsider = Principal::new(9, vec![]);
    let err = stack
        .approvals
        .decide(&outsider, request.id, Decision::Approve, None)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "FORBIDDEN");

    // Granting edit on approvals makes the same principal a valid approver
    let role = stack.roles.create_role(&root, "approvers", None).await?;
    stack
        .roles
        .set_permission(
            &root,
            role.id,
            Module::Approvals,
            Capabilities {
                edit: true,
                ..Capabilities::none()
            },
        )
        .await?;
    stack.roles.assign_role(&root, 9, role.id).await?;

    let approved = stack
        .approvals
        .decide(&outsider, request.id, Decision::Approve, None)
        .await?;
    assert_eq!(approved.approver_id, Some(9));
    Ok(())
}

#[tokio::test]
async fn pending_requests_survive_permission_revocation() -> Result<()> {
    let stack = common::stack();
    let root = common::superadmin(1);

    // Clerk holds the grant that allows filing extension requests
    let role = stack.roles.create_role(&root, "clerks", None).await?;
    stack
        .roles
        .set_permission(
            &root,
            role.id,
            Module::BatchExtensions,
            Capabilities {
                add: true,
                ..Capabilities::none()
            },
        )
        .await?;
    stack.roles.assign_role(&root, 5, role.id).await?;
    stack.store.insert_batch(7, 24).await;

    let clerk = Principal::new(5, vec![]);
    let request = stack
        .approvals
        .create(
            &clerk,
            7,
            RequestDetails::BatchExtension(ExtensionDetails { extra_sessions: 4 }),
            Some("Holiday backlog".into()),
        )
        .await?;

    // Revoking the clerk's role does not invalidate the pending request
    stack.roles.unassign_role(&root, 5, role.id).await?;
    let approved = stack
        .approvals
        .decide(&root, request.id, Decision::Approve, None)
        .await?;
    assert_eq!(approved.status, RequestStatus::Approved);
    assert_eq!(stack.store.batch_sessions(7).await, Some(28));
    Ok(())
}

#[tokio::test]
async fn deleted_subject_still_decidable() -> Result<()> {
    let stack = common::stack();
    stack.store.insert_batch(7, 24).await;
    let request = stack
        .approvals
        .create(
            &common::superadmin(5),
            7,
            RequestDetails::BatchExtension(ExtensionDetails { extra_sessions: 2 }),
            None,
        )
        .await?;

    stack.store.remove_batch(7).await;
    let approved = stack
        .approvals
        .decide(&common::superadmin(1), request.id, Decision::Approve, None)
        .await?;
    assert_eq!(approved.status, RequestStatus::Approved);
    Ok(())
}

#[tokio::test]
async fn list_filters_by_subject_kind_and_status() -> Result<()> {
    let stack = common::stack();
    stack.store.insert_student(42).await;
    stack.store.insert_batch(7, 24).await;
    let student = Principal::new(42, vec![]);

    let leave = stack
        .approvals
        .create(&student, 42, leave_details(), None)
        .await?;
    let extension = stack
        .approvals
        .create(
            &common::superadmin(5),
            7,
            RequestDetails::BatchExtension(ExtensionDetails { extra_sessions: 1 }),
            None,
        )
        .await?;
    stack
        .approvals
        .decide(
            &common::superadmin(1),
            extension.id,
            Decision::Reject,
            Some("Not needed".into()),
        )
        .await?;

    let pending = stack
        .approvals
        .list(RequestFilter {
            status: Some(RequestStatus::Pending),
            ..Default::default()
        })
        .await?;
    assert_eq!(pending.iter().map(|r| r.id).collect::<Vec<_>>(), vec![leave.id]);

    let for_batch = stack
        .approvals
        .list(RequestFilter {
            subject_id: Some(7),
            kind: Some(RequestKind::BatchExtension),
            ..Default::default()
        })
        .await?;
    assert_eq!(for_batch.len(), 1);
    assert_eq!(for_batch[0].status, RequestStatus::Rejected);
    assert_eq!(for_batch[0].rejection_reason.as_deref(), Some("Not needed"));
    Ok(())
}
