mod common;

use anyhow::Result;

use academy_access::types::{Action, Capabilities, Module};

#[tokio::test]
async fn set_permission_is_reflected_exactly() -> Result<()> {
    let stack = common::stack();
    let root = common::superadmin(1);

    let role = stack.roles.create_role(&root, "front-desk", None).await?;
    stack.roles.assign_role(&root, 10, role.id).await?;
    stack
        .roles
        .set_permission(
            &root,
            role.id,
            Module::Students,
            Capabilities {
                view: true,
                add: true,
                ..Capabilities::none()
            },
        )
        .await?;

    let matrix = stack.roles.effective_permissions(10).await?;
    assert!(matrix.allows(Module::Students, Action::View));
    assert!(matrix.allows(Module::Students, Action::Add));
    assert!(!matrix.allows(Module::Students, Action::Edit));
    assert!(!matrix.allows(Module::Students, Action::Delete));

    // The role itself carries exactly one entry
    let entries = stack.roles.role_permissions(role.id).await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].module, Module::Students);
    // No bleed into modules that were never granted
    for module in Module::ALL {
        if module != Module::Students {
            assert_eq!(matrix.get(module), Capabilities::none());
        }
    }
    Ok(())
}

#[tokio::test]
async fn effective_capability_is_or_across_roles() -> Result<()> {
    let stack = common::stack();
    let root = common::superadmin(1);

    let readers = stack.roles.create_role(&root, "readers", None).await?;
    let writers = stack.roles.create_role(&root, "writers", None).await?;
    stack
        .roles
        .set_permission(
            &root,
            readers.id,
            Module::Payments,
            Capabilities {
                view: true,
                ..Capabilities::none()
            },
        )
        .await?;
    stack
        .roles
        .set_permission(
            &root,
            writers.id,
            Module::Payments,
            Capabilities {
                add: true,
                edit: true,
                ..Capabilities::none()
            },
        )
        .await?;
    stack.roles.assign_role(&root, 20, readers.id).await?;
    stack.roles.assign_role(&root, 20, writers.id).await?;

    let matrix = stack.roles.effective_permissions(20).await?;
    assert!(matrix.allows(Module::Payments, Action::View));
    assert!(matrix.allows(Module::Payments, Action::Add));
    assert!(matrix.allows(Module::Payments, Action::Edit));
    assert!(!matrix.allows(Module::Payments, Action::Delete));
    Ok(())
}

#[tokio::test]
async fn duplicate_role_name_is_conflict() -> Result<()> {
    let stack = common::stack();
    let root = common::superadmin(1);

    stack.roles.create_role(&root, "staff", None).await?;
    let err = stack
        .roles
        .create_role(&root, "staff", Some("second"))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "CONFLICT");
    Ok(())
}

#[tokio::test]
async fn duplicate_assignment_is_conflict() -> Result<()> {
    let stack = common::stack();
    let root = common::superadmin(1);

    let role = stack.roles.create_role(&root, "staff", None).await?;
    stack.roles.assign_role(&root, 5, role.id).await?;
    let err = stack.roles.assign_role(&root, 5, role.id).await.unwrap_err();
    assert_eq!(err.error_code(), "CONFLICT");
    Ok(())
}

#[tokio::test]
async fn system_role_delete_is_forbidden_and_harmless() -> Result<()> {
    let stack = common::stack();
    let root = common::superadmin(1);
    let admin = common::seeded_admin(&stack, 2).await?;

    let admin_role = stack
        .roles
        .list_roles()
        .await?
        .into_iter()
        .find(|r| r.name == "admin")
        .unwrap();

    let err = stack
        .roles
        .delete_role(&root, admin_role.id)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "FORBIDDEN");

    // The role, its grants, and its assignments are intact
    let matrix = stack.roles.effective_permissions(admin.user_id).await?;
    assert!(matrix.allows(Module::Users, Action::Edit));
    Ok(())
}

#[tokio::test]
async fn delete_role_cascades_grants_and_assignments() -> Result<()> {
    let stack = common::stack();
    let root = common::superadmin(1);

    let role = stack.roles.create_role(&root, "temps", None).await?;
    stack
        .roles
        .set_permission(&root, role.id, Module::Reports, Capabilities::all())
        .await?;
    stack.roles.assign_role(&root, 30, role.id).await?;
    assert!(stack
        .roles
        .effective_permissions(30)
        .await?
        .allows(Module::Reports, Action::View));

    stack.roles.delete_role(&root, role.id).await?;
    assert!(stack.roles.effective_permissions(30).await?.is_empty());
    assert!(stack.roles.user_roles(30).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn admin_tier_is_required_for_role_mutations() -> Result<()> {
    let stack = common::stack();
    let nobody = academy_access::principal::Principal::new(50, vec![]);

    let err = stack
        .roles
        .create_role(&nobody, "rogue", None)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "FORBIDDEN");

    // A seeded admin passes the same gate through the matrix
    let admin = common::seeded_admin(&stack, 51).await?;
    stack.roles.create_role(&admin, "legit", None).await?;
    Ok(())
}
