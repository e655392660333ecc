//! Authorization checks performed before core operations.
//!
//! Capabilities are granted by role; ownership is checked against the record
//! being touched. Admins pass every ownership check.

use uuid::Uuid;

use super::{AuthUser, ADMIN_ROLE};
use crate::errors::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Capability {
    /// Create, update and delete catalog products
    ManageCatalog,
    ViewAllOrders,
    /// Move orders through shipping states
    ManageFulfillment,
}

impl Capability {
    pub fn required_role(self) -> &'static str {
        match self {
            Capability::ManageCatalog
            | Capability::ViewAllOrders
            | Capability::ManageFulfillment => ADMIN_ROLE,
        }
    }
}

pub fn allows(actor: &AuthUser, capability: Capability) -> bool {
    actor.has_role(capability.required_role())
}

pub fn require(actor: &AuthUser, capability: Capability) -> Result<(), ServiceError> {
    if allows(actor, capability) {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(format!("Missing capability {}", capability)))
    }
}

/// True when the actor owns the record or is an admin.
pub fn can_access(actor: &AuthUser, owner_id: Uuid) -> bool {
    actor.user_id == owner_id || actor.is_admin()
}

pub fn require_owner(actor: &AuthUser, owner_id: Uuid) -> Result<(), ServiceError> {
    if can_access(actor, owner_id) {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(
            "Resource belongs to another user".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CUSTOMER_ROLE;

    fn actor(roles: &[&str]) -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            name: None,
            email: None,
            roles: roles.iter().map(|r| r.to_string()).collect(),
            token_id: "jti".into(),
        }
    }

    #[test]
    fn customers_lack_admin_capabilities() {
        let customer = actor(&[CUSTOMER_ROLE]);
        assert!(require(&customer, Capability::ManageCatalog).is_err());
        assert!(require(&customer, Capability::ViewAllOrders).is_err());
        assert!(require(&customer, Capability::ManageFulfillment).is_err());
    }

    #[test]
    fn admins_hold_every_capability() {
        let admin = actor(&[CUSTOMER_ROLE, ADMIN_ROLE]);
        assert!(require(&admin, Capability::ManageCatalog).is_ok());
        assert!(require(&admin, Capability::ManageFulfillment).is_ok());
    }

    #[test]
    fn ownership_is_checked_unless_admin() {
        let owner = actor(&[CUSTOMER_ROLE]);
        let stranger = actor(&[CUSTOMER_ROLE]);
        let admin = actor(&[ADMIN_ROLE]);

        assert!(require_owner(&owner, owner.user_id).is_ok());
        assert!(matches!(
            require_owner(&stranger, owner.user_id),
            Err(ServiceError::Forbidden(_))
        ));
        assert!(require_owner(&admin, owner.user_id).is_ok());
    }
}
