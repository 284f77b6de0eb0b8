/// Role checks
///
/// Cardify has three account levels. Plain users may browse and like cards,
/// business users may also create cards, and admins may do anything. Every
/// protected operation goes through one of three checks:
///
/// | Check | Passes when |
/// |---|---|
/// | [`require_admin`] | caller is an admin |
/// | [`require_business`] | caller is a business user or an admin |
/// | [`require_owner_or_admin`] | caller owns the resource or is an admin |
///
/// Role flags come from the access token (see [`super::jwt::Claims`]), so
/// none of these checks touch the database. Ownership checks need the
/// resource's owner id, which the handler loads first.
///
/// # Example
///
/// ```
/// use cardify_shared::auth::authorization::{require_business, require_owner_or_admin};
/// use cardify_shared::auth::middleware::AuthContext;
/// use uuid::Uuid;
///
/// let caller = AuthContext { user_id: Uuid::new_v4(), is_business: true, is_admin: false };
/// assert!(require_business(&caller).is_ok());
/// assert!(require_owner_or_admin(&caller, Uuid::new_v4()).is_err());
/// ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::middleware::AuthContext;

/// Account level, derived from the two role flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Business,
    Admin,
}

impl Role {
    /// Admin wins over business
    pub fn from_flags(is_business: bool, is_admin: bool) -> Self {
        if is_admin {
            Role::Admin
        } else if is_business {
            Role::Business
        } else {
            Role::User
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Business => "business",
            Role::Admin => "admin",
        }
    }
}

impl AuthContext {
    /// Effective account level of the caller
    pub fn role(&self) -> Role {
        Role::from_flags(self.is_business, self.is_admin)
    }
}

/// Error type for authorization checks
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthzError {
    /// Caller's role is below what the operation needs
    #[error("Insufficient permissions: requires {required:?}, has {actual:?}")]
    InsufficientRole { required: Role, actual: Role },

    /// Caller is neither the owner nor an admin
    #[error("Not authorized to access this resource")]
    NotOwner,
}

/// Admin-only operations
pub fn require_admin(auth: &AuthContext) -> Result<(), AuthzError> {
    require_role(auth, Role::Admin)
}

/// Business-or-admin operations (creating cards)
pub fn require_business(auth: &AuthContext) -> Result<(), AuthzError> {
    require_role(auth, Role::Business)
}

/// Checks the caller's role is at least `required`
pub fn require_role(auth: &AuthContext, required: Role) -> Result<(), AuthzError> {
    let actual = auth.role();
    if actual < required {
        tracing::debug!(
            user_id = %auth.user_id,
            required = required.as_str(),
            actual = actual.as_str(),
            "Role check failed"
        );
        return Err(AuthzError::InsufficientRole { required, actual });
    }

    Ok(())
}

/// Owner-or-admin operations (editing/deleting a card or an account)
pub fn require_owner_or_admin(auth: &AuthContext, owner_id: Uuid) -> Result<(), AuthzError> {
    if auth.owns_or_admin(owner_id) {
        Ok(())
    } else {
        tracing::debug!(
            user_id = %auth.user_id,
            owner_id = %owner_id,
            "Ownership check failed"
        );
        Err(AuthzError::NotOwner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(is_business: bool, is_admin: bool) -> AuthContext {
        AuthContext {
            user_id: Uuid::new_v4(),
            is_business,
            is_admin,
        }
    }

    #[test]
    fn test_role_from_flags() {
        assert_eq!(Role::from_flags(false, false), Role::User);
        assert_eq!(Role::from_flags(true, false), Role::Business);
        assert_eq!(Role::from_flags(false, true), Role::Admin);
        assert_eq!(Role::from_flags(true, true), Role::Admin);
    }

    #[test]
    fn test_role_ordering() {
        assert!(Role::User < Role::Business);
        assert!(Role::Business < Role::Admin);
    }

    #[test]
    fn test_require_admin() {
        assert!(require_admin(&caller(false, true)).is_ok());
        assert_eq!(
            require_admin(&caller(true, false)),
            Err(AuthzError::InsufficientRole {
                required: Role::Admin,
                actual: Role::Business
            })
        );
        assert!(require_admin(&caller(false, false)).is_err());
    }

    #[test]
    fn test_require_business_accepts_admin() {
        assert!(require_business(&caller(true, false)).is_ok());
        assert!(require_business(&caller(false, true)).is_ok());
        assert!(require_business(&caller(false, false)).is_err());
    }

    #[test]
    fn test_require_owner_or_admin() {
        let owner = caller(false, false);

        assert!(require_owner_or_admin(&owner, owner.user_id).is_ok());
        assert!(require_owner_or_admin(&caller(false, true), owner.user_id).is_ok());
        assert_eq!(
            require_owner_or_admin(&caller(true, false), owner.user_id),
            Err(AuthzError::NotOwner)
        );
    }
}
