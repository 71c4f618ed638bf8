use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{database::Database, models::User, utils::verify_token};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: String,
    pub is_active: bool,
}

impl From<User> for CurrentUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            full_name: user.full_name,
            role: user.role,
            is_active: user.is_active,
        }
    }
}

pub async fn get_current_user(cookies: Cookies, db: &Database) -> Option<CurrentUser> {
    // Try to get JWT token from auth_token cookie
    let token = cookies.get("auth_token")?.value().to_string();

    let claims = verify_token(&token).ok()?;
    let user_id = Uuid::parse_str(&claims.sub).ok()?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 AND is_active = true")
        .bind(user_id)
        .fetch_optional(db)
        .await
        .ok()??;

    Some(CurrentUser::from(user))
}

/// Role gate matching the sidebar matrix: admin always passes.
pub fn require_role(user: &CurrentUser, roles: &[&str]) -> Result<(), StatusCode> {
    if user.role == "admin" || roles.contains(&user.role.as_str()) {
        Ok(())
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with_role(role: &str) -> CurrentUser {
        CurrentUser {
            id: Uuid::new_v4(),
            email: "u@example.com".to_string(),
            full_name: "U".to_string(),
            role: role.to_string(),
            is_active: true,
        }
    }

    #[test]
    fn admin_passes_every_gate() {
        let admin = user_with_role("admin");
        assert!(require_role(&admin, &["warehouse"]).is_ok());
        assert!(require_role(&admin, &[]).is_ok());
    }

    #[test]
    fn role_must_be_listed() {
        let sales = user_with_role("sales");
        assert!(require_role(&sales, &["accounts", "sales"]).is_ok());
        assert_eq!(
            require_role(&sales, &["accounts"]),
            Err(StatusCode::FORBIDDEN)
        );
    }
}
