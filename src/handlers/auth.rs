use axum::{extract::State, http::StatusCode, response::Json};
use chrono::{Duration, Utc};
use serde::Deserialize;
use tower_cookies::{Cookie, Cookies};
use uuid::Uuid;

use crate::{
    database::Database,
    middleware::get_current_user,
    models::{User, UserResponse},
    utils::{create_token, hash_password, verify_password},
};

#[derive(Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    email: String,
    password: String,
    full_name: String,
    role: Option<String>,
}

const ROLES: &[&str] = &["admin", "accounts", "sales", "warehouse"];

pub async fn login(
    State(db): State<Database>,
    cookies: Cookies,
    Json(req): Json<LoginRequest>,
) -> Result<Json<UserResponse>, StatusCode> {
    let user = sqlx::query_as::<_, User>(
        "SELECT * FROM users WHERE email = $1 AND is_active = true",
    )
    .bind(&req.email)
    .fetch_optional(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .ok_or(StatusCode::UNAUTHORIZED)?;

    let valid = verify_password(&req.password, &user.password_hash)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    if !valid {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let token = create_token(user.id, user.email.clone())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    // Session record in database for additional tracking
    let session_id = Uuid::new_v4();
    let expires_at = Utc::now() + Duration::hours(24);
    let _ = sqlx::query("INSERT INTO sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
        .bind(session_id)
        .bind(user.id)
        .bind(expires_at)
        .execute(&db)
        .await;

    let _ = sqlx::query("UPDATE users SET last_login = NOW() WHERE id = $1")
        .bind(user.id)
        .execute(&db)
        .await;

    let cookie = Cookie::build(("auth_token", token))
        .path("/")
        .http_only(true)
        .max_age(time::Duration::hours(24))
        .build();
    cookies.add(cookie);

    Ok(Json(UserResponse::from(user)))
}

pub async fn logout(cookies: Cookies) -> StatusCode {
    cookies.remove(Cookie::from("auth_token"));
    StatusCode::NO_CONTENT
}

pub async fn register(
    State(db): State<Database>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), StatusCode> {
    let role = req.role.unwrap_or_else(|| "sales".to_string());
    if !ROLES.contains(&role.as_str()) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let password_hash =
        hash_password(&req.password).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (email, password_hash, full_name, role)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(&req.email)
    .bind(&password_hash)
    .bind(&req.full_name)
    .bind(&role)
    .fetch_one(&db)
    .await
    .map_err(|e| {
        log::error!("failed to create user: {}", e);
        StatusCode::CONFLICT
    })?;

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

pub async fn me(
    cookies: Cookies,
    State(db): State<Database>,
) -> Result<Json<crate::middleware::CurrentUser>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    Ok(Json(user))
}
