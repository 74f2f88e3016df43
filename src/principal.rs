use serde::{Deserialize, Serialize};

/// Seeded system role names. These exist in every deployment and may not be
/// deleted.
pub const SUPERADMIN_ROLE: &str = "superadmin";
pub const ADMIN_ROLE: &str = "admin";

/// Authenticated actor context supplied by upstream authentication
/// middleware. Passed explicitly to every authorization and workflow call;
/// the subsystem holds no ambient request state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: i64,
    /// Names of the roles currently assigned to the user, as resolved by
    /// the authentication layer at token validation time.
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new(user_id: i64, roles: Vec<String>) -> Self {
        Self { user_id, roles }
    }

    pub fn has_role(&self, name: &str) -> bool {
        self.roles.iter().any(|r| r == name)
    }

    /// Superadmin principals bypass the permission matrix entirely
    pub fn is_superadmin(&self) -> bool {
        self.has_role(SUPERADMIN_ROLE)
    }
}
