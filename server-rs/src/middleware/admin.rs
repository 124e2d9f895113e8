use axum::{extract::Request, middleware::Next, response::Response};

use crate::error::AppError;
use crate::middleware::auth::AuthUser;

fn role_level(role: &str) -> i32 {
    match role {
        "moderator" => 1,
        "admin" => 2,
        "super_admin" => 3,
        _ => 0,
    }
}

fn check_role(user: &AuthUser, min_role: &str) -> Result<(), AppError> {
    let actual = user.role.as_deref().unwrap_or_default();
    if actual.is_empty() || role_level(actual) < role_level(min_role) {
        return Err(AppError::Forbidden(format!(
            "Requires {} role or higher",
            min_role
        )));
    }
    Ok(())
}

/// Middleware: the token must carry the `admin` role (or above).
/// Layer it inside `authenticate`.
pub async fn require_admin(req: Request, next: Next) -> Result<Response, AppError> {
    let user = req
        .extensions()
        .get::<AuthUser>()
        .ok_or_else(|| AppError::Unauthenticated("Authentication required".into()))?;

    check_role(user, "admin")?;
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Option<&str>) -> AuthUser {
        AuthUser {
            id: "u1".into(),
            role: role.map(String::from),
        }
    }

    #[test]
    fn admin_and_above_pass() {
        assert!(check_role(&user(Some("admin")), "admin").is_ok());
        assert!(check_role(&user(Some("super_admin")), "admin").is_ok());
    }

    #[test]
    fn lower_or_missing_roles_are_forbidden() {
        assert!(matches!(
            check_role(&user(Some("moderator")), "admin"),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            check_role(&user(None), "admin"),
            Err(AppError::Forbidden(_))
        ));
    }
}
