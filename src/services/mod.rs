pub mod approval_service;
pub mod authz_service;
pub mod role_service;
pub mod serial_service;

pub use approval_service::ApprovalService;
pub use authz_service::AuthzService;
pub use role_service::RoleService;
pub use serial_service::SerialService;

use crate::config;

/// Audit-trail log line, emitted only when audit logging is enabled
pub(crate) fn audit(event: String) {
    if config::config().security.enable_audit_logging {
        tracing::info!(target: "audit", "{}", event);
    }
}
