/// Shared types used across the codebase

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AccessError;

/// Closed set of system areas permissions are granted against.
///
/// Stored as snake_case strings; an unknown string at the boundary is a
/// validation failure, never a silently-ignored module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    Batches,
    Students,
    Faculty,
    Employees,
    Sessions,
    Attendance,
    Payments,
    Portfolios,
    Reports,
    Approvals,
    Users,
    SoftwareCompletions,
    LeaveTypes,
    BatchExtensions,
}

impl Module {
    pub const ALL: [Module; 14] = [
        Module::Batches,
        Module::Students,
        Module::Faculty,
        Module::Employees,
        Module::Sessions,
        Module::Attendance,
        Module::Payments,
        Module::Portfolios,
        Module::Reports,
        Module::Approvals,
        Module::Users,
        Module::SoftwareCompletions,
        Module::LeaveTypes,
        Module::BatchExtensions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Module::Batches => "batches",
            Module::Students => "students",
            Module::Faculty => "faculty",
            Module::Employees => "employees",
            Module::Sessions => "sessions",
            Module::Attendance => "attendance",
            Module::Payments => "payments",
            Module::Portfolios => "portfolios",
            Module::Reports => "reports",
            Module::Approvals => "approvals",
            Module::Users => "users",
            Module::SoftwareCompletions => "software_completions",
            Module::LeaveTypes => "leave_types",
            Module::BatchExtensions => "batch_extensions",
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Module {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Module::ALL
            .iter()
            .find(|m| m.as_str() == s)
            .copied()
            .ok_or_else(|| AccessError::validation(format!("Unknown module: {}", s)))
    }
}

/// Capability grantable independently per module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    View,
    Add,
    Edit,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Add => "add",
            Action::Edit => "edit",
            Action::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four per-module capability flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub view: bool,
    pub add: bool,
    pub edit: bool,
    pub delete: bool,
}

impl Capabilities {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            view: true,
            add: true,
            edit: true,
            delete: true,
        }
    }

    pub fn allows(&self, action: Action) -> bool {
        match action {
            Action::View => self.view,
            Action::Add => self.add,
            Action::Edit => self.edit,
            Action::Delete => self.delete,
        }
    }

    /// Logical OR per capability, used when merging entries across roles
    pub fn or(&self, other: Capabilities) -> Capabilities {
        Capabilities {
            view: self.view || other.view,
            add: self.add || other.add,
            edit: self.edit || other.edit,
            delete: self.delete || other.delete,
        }
    }
}

/// A user's effective capabilities, merged across every assigned role.
/// Modules with no entry default to all-false.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionMatrix {
    entries: HashMap<Module, Capabilities>,
}

impl PermissionMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, module: Module) -> Capabilities {
        self.entries.get(&module).copied().unwrap_or_default()
    }

    pub fn allows(&self, module: Module, action: Action) -> bool {
        self.get(module).allows(action)
    }

    /// OR-merge a role's entry into the matrix
    pub fn merge(&mut self, module: Module, capabilities: Capabilities) {
        let merged = self.get(module).or(capabilities);
        self.entries.insert(module, merged);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_round_trip() {
        for module in Module::ALL {
            let parsed: Module = module.as_str().parse().unwrap();
            assert_eq!(parsed, module);
        }
    }

    #[test]
    fn test_unknown_module_rejected() {
        let err = "grades".parse::<Module>().unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_capabilities_or_merge() {
        let read_only = Capabilities {
            view: true,
            ..Capabilities::none()
        };
        let write_only = Capabilities {
            add: true,
            edit: true,
            ..Capabilities::none()
        };
        let merged = read_only.or(write_only);
        assert!(merged.view && merged.add && merged.edit);
        assert!(!merged.delete);
    }

    #[test]
    fn test_matrix_defaults_to_all_false() {
        let matrix = PermissionMatrix::new();
        assert!(!matrix.allows(Module::Payments, Action::View));
        assert_eq!(matrix.get(Module::Payments), Capabilities::none());
    }

    #[test]
    fn test_matrix_merge_no_bleed_across_modules() {
        let mut matrix = PermissionMatrix::new();
        matrix.merge(Module::Students, Capabilities::all());
        assert!(matrix.allows(Module::Students, Action::Delete));
        assert!(!matrix.allows(Module::Faculty, Action::View));
    }
}
