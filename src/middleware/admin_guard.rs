// ABOUTME: Central admin authorization guard for routes requiring admin privileges
// ABOUTME: Verifies user has admin role and returns 403 Forbidden if not authorized
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Admin authorization guard
//!
//! Instead of each handler performing inline `user.role.is_admin()` checks,
//! handlers call `require_admin` after resolving the session.

use crate::errors::AppError;
use crate::models::User;

/// Require admin privileges for a user. Returns `user` unchanged if
/// authorized, or `Forbidden` otherwise.
///
/// # Errors
/// Returns `AppError::Forbidden` if `user.role` is not admin.
pub fn require_admin(user: User) -> Result<User, AppError> {
    if user.role.is_admin() {
        Ok(user)
    } else {
        Err(AppError::forbidden("admin privileges required"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use chrono::Utc;
    use uuid::Uuid;

    fn user_with_role(role: Role) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            upstream_id: 1,
            username: "octocat".into(),
            email: None,
            role,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn admin_passes_through() {
        assert!(require_admin(user_with_role(Role::Admin)).is_ok());
    }

    #[test]
    fn non_admin_is_forbidden() {
        let err = require_admin(user_with_role(Role::User)).expect_err("must fail");
        assert_eq!(err.code, crate::errors::ErrorCode::Forbidden);
    }
}
