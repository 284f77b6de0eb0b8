/// Authentication and authorization utilities
///
/// # Modules
///
/// - [`password`]: Argon2id password hashing and strength rules
/// - [`jwt`]: JWT token generation and validation (role flags travel in the claims)
/// - [`middleware`]: Bearer token extraction and the per-request `AuthContext`
/// - [`authorization`]: The three role checks (admin, business-or-admin, owner-or-admin)
///
/// # Example
///
/// ```no_run
/// use cardify_shared::auth::password::{hash_password, verify_password};
/// use cardify_shared::auth::jwt::{create_token, Claims, TokenType};
/// use uuid::Uuid;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let hash = hash_password("Us3r!pass")?;
/// assert!(verify_password("Us3r!pass", &hash)?);
///
/// let claims = Claims::new(Uuid::new_v4(), true, false, TokenType::Access);
/// let token = create_token(&claims, "secret-key")?;
/// # Ok(())
/// # }
/// ```

pub mod authorization;
pub mod jwt;
pub mod middleware;
pub mod password;
