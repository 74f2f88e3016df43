pub mod approval;
pub mod role;

pub use approval::{
    ApprovalRequest, ChangeDetails, Decision, ExtensionDetails, LeaveDetails, NewApprovalRequest,
    RequestDetails, RequestFilter, RequestKind, RequestStatus,
};
pub use role::{PermissionEntry, Role, RoleAssignment};
