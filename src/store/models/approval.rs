//! Approval request model shared by every request kind.
//!
//! Leave, batch-extension, and generic change requests all drive the same
//! pending/approved/rejected state machine; the kind tag plus a typed
//! details payload is the only thing that varies.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AccessError, AccessResult};
use crate::types::Module;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Leave,
    BatchExtension,
    Change,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Leave => "leave",
            RequestKind::BatchExtension => "batch_extension",
            RequestKind::Change => "change",
        }
    }

    /// Module whose `add` capability governs creating a request of this kind
    pub fn module(&self) -> Module {
        match self {
            RequestKind::Leave => Module::LeaveTypes,
            RequestKind::BatchExtension => Module::BatchExtensions,
            RequestKind::Change => Module::Approvals,
        }
    }

    /// Whether the subject may file the request for itself without holding
    /// the module grant (a student requesting their own leave)
    pub fn is_self_service(&self) -> bool {
        matches!(self, RequestKind::Leave)
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestKind {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "leave" => Ok(RequestKind::Leave),
            "batch_extension" => Ok(RequestKind::BatchExtension),
            "change" => Ok(RequestKind::Change),
            other => Err(AccessError::validation(format!(
                "Unknown request kind: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "approved" => Ok(RequestStatus::Approved),
            "rejected" => Ok(RequestStatus::Rejected),
            other => Err(AccessError::validation(format!(
                "Unknown request status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

/// Leave span requested for a student; the subject is the student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveDetails {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Extra sessions requested for a batch; the subject is the batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionDetails {
    pub extra_sessions: i32,
}

/// Free-form change proposal; the decision record is the artifact and the
/// host system applies the change itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeDetails {
    pub description: String,
}

/// Kind-specific payload, persisted as the request's JSON details column.
/// Untagged: the kind column, not the payload, is the discriminator, and
/// the three payload shapes share no field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestDetails {
    Leave(LeaveDetails),
    BatchExtension(ExtensionDetails),
    Change(ChangeDetails),
}

impl RequestDetails {
    pub fn kind(&self) -> RequestKind {
        match self {
            RequestDetails::Leave(_) => RequestKind::Leave,
            RequestDetails::BatchExtension(_) => RequestKind::BatchExtension,
            RequestDetails::Change(_) => RequestKind::Change,
        }
    }

    pub fn validate(&self) -> AccessResult<()> {
        match self {
            RequestDetails::Leave(leave) => {
                if leave.end_date < leave.start_date {
                    return Err(AccessError::validation(
                        "Leave end date must not precede start date",
                    ));
                }
                Ok(())
            }
            RequestDetails::BatchExtension(ext) => {
                if ext.extra_sessions <= 0 {
                    return Err(AccessError::validation(
                        "Batch extension must request at least one session",
                    ));
                }
                Ok(())
            }
            RequestDetails::Change(change) => {
                if change.description.trim().is_empty() {
                    return Err(AccessError::validation(
                        "Change request requires a description",
                    ));
                }
                Ok(())
            }
        }
    }

    pub fn to_value(&self) -> AccessResult<serde_json::Value> {
        let value = match self {
            RequestDetails::Leave(d) => serde_json::to_value(d),
            RequestDetails::BatchExtension(d) => serde_json::to_value(d),
            RequestDetails::Change(d) => serde_json::to_value(d),
        };
        value.map_err(|e| AccessError::validation(format!("Unserializable details: {}", e)))
    }

    /// Rebuild the typed payload from a stored (kind, details) pair
    pub fn from_parts(kind: RequestKind, value: serde_json::Value) -> AccessResult<Self> {
        let parsed = match kind {
            RequestKind::Leave => serde_json::from_value(value).map(RequestDetails::Leave),
            RequestKind::BatchExtension => {
                serde_json::from_value(value).map(RequestDetails::BatchExtension)
            }
            RequestKind::Change => serde_json::from_value(value).map(RequestDetails::Change),
        };
        parsed.map_err(|e| {
            AccessError::validation(format!("Malformed {} request details: {}", kind, e))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: i64,
    pub kind: RequestKind,
    /// Concrete entity the request affects: student for leave, batch for
    /// extension, host-defined for generic change
    pub subject_id: i64,
    pub details: RequestDetails,
    pub requested_by: i64,
    pub status: RequestStatus,
    /// Human reason set by the requester
    pub reason: Option<String>,
    /// Null until the transition out of pending; always the principal who
    /// performed that transition
    pub approver_id: Option<i64>,
    pub approved_at: Option<DateTime<Utc>>,
    /// Set only on rejection
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a new request; status always starts pending
#[derive(Debug, Clone)]
pub struct NewApprovalRequest {
    pub subject_id: i64,
    pub requested_by: i64,
    pub details: RequestDetails,
    pub reason: Option<String>,
}

/// list() filters; all fields optional and AND-combined
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub subject_id: Option<i64>,
    pub kind: Option<RequestKind>,
    pub status: Option<RequestStatus>,
}

impl RequestFilter {
    pub fn matches(&self, request: &ApprovalRequest) -> bool {
        self.subject_id.map_or(true, |s| request.subject_id == s)
            && self.kind.map_or(true, |k| request.kind == k)
            && self.status.map_or(true, |s| request.status == s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leave(start: &str, end: &str) -> RequestDetails {
        RequestDetails::Leave(LeaveDetails {
            start_date: start.parse().unwrap(),
            end_date: end.parse().unwrap(),
        })
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            RequestKind::Leave,
            RequestKind::BatchExtension,
            RequestKind::Change,
        ] {
            assert_eq!(kind.as_str().parse::<RequestKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_leave_date_span_validation() {
        assert!(leave("2026-02-01", "2026-02-03").validate().is_ok());
        let err = leave("2026-02-03", "2026-02-01").validate().unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_extension_requires_positive_sessions() {
        let details = RequestDetails::BatchExtension(ExtensionDetails { extra_sessions: 0 });
        assert!(details.validate().is_err());
    }

    #[test]
    fn test_details_value_round_trip() {
        let details = leave("2026-02-01", "2026-02-03");
        let value = details.to_value().unwrap();
        let back = RequestDetails::from_parts(RequestKind::Leave, value).unwrap();
        assert_eq!(back, details);
    }

    #[test]
    fn test_mismatched_details_rejected() {
        let value = serde_json::json!({ "extra_sessions": 4 });
        let err = RequestDetails::from_parts(RequestKind::Leave, value).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }
}
