//! Role-based access control for manager and settlement operations.
//!
//! Authorization is checked before business logic runs; a failed check
//! leaves no state change behind.

use crate::vault::VaultError;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Capabilities a caller may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Grants and revokes roles.
    Admin,
    /// Adapter management, allocation tuning, pause, rebalance, harvest.
    Manager,
    /// Reservation and deduction calls from the settlement workflow.
    Settlement,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Manager => write!(f, "manager"),
            Role::Settlement => write!(f, "settlement"),
        }
    }
}

/// Tracks which roles each caller holds.
#[derive(Debug, Clone, Default)]
pub struct AccessController {
    grants: HashMap<String, HashSet<Role>>,
}

impl AccessController {
    /// Create a controller with `admin` holding every role.
    pub fn new(admin: &str) -> Self {
        let mut grants: HashMap<String, HashSet<Role>> = HashMap::new();
        grants.insert(
            admin.to_string(),
            [Role::Admin, Role::Manager, Role::Settlement].into(),
        );
        Self { grants }
    }

    /// Check that `caller` holds `role`.
    pub fn require(&self, caller: &str, role: Role) -> Result<(), VaultError> {
        if self.has_role(caller, role) {
            Ok(())
        } else {
            Err(VaultError::Unauthorized {
                caller: caller.to_string(),
                role: role.to_string(),
            })
        }
    }

    pub fn has_role(&self, caller: &str, role: Role) -> bool {
        self.grants
            .get(caller)
            .map(|roles| roles.contains(&role))
            .unwrap_or(false)
    }

    /// Grant `role` to `grantee`. Admin only.
    pub fn grant(&mut self, caller: &str, grantee: &str, role: Role) -> Result<(), VaultError> {
        self.require(caller, Role::Admin)?;
        self.grants.entry(grantee.to_string()).or_default().insert(role);
        Ok(())
    }

    /// Revoke `role` from `grantee`. Admin only.
    pub fn revoke(&mut self, caller: &str, grantee: &str, role: Role) -> Result<(), VaultError> {
        self.require(caller, Role::Admin)?;
        if let Some(roles) = self.grants.get_mut(grantee) {
            roles.remove(&role);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_holds_all_roles() {
        let access = AccessController::new("root");
        assert!(access.require("root", Role::Admin).is_ok());
        assert!(access.require("root", Role::Manager).is_ok());
        assert!(access.require("root", Role::Settlement).is_ok());
    }

    #[test]
    fn test_unknown_caller_rejected() {
        let access = AccessController::new("root");
        let err = access.require("mallory", Role::Manager).unwrap_err();
        assert!(matches!(err, VaultError::Unauthorized { .. }));
    }

    #[test]
    fn test_grant_and_revoke() {
        let mut access = AccessController::new("root");
        access.grant("root", "ops", Role::Manager).unwrap();
        assert!(access.require("ops", Role::Manager).is_ok());
        assert!(access.require("ops", Role::Settlement).is_err());

        access.revoke("root", "ops", Role::Manager).unwrap();
        assert!(access.require("ops", Role::Manager).is_err());
    }

    #[test]
    fn test_non_admin_cannot_grant() {
        let mut access = AccessController::new("root");
        access.grant("root", "ops", Role::Manager).unwrap();
        assert!(access.grant("ops", "ops", Role::Admin).is_err());
    }
}
