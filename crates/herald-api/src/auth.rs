use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, extract::rejection::JsonRejection, http::StatusCode};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::info;
use uuid::Uuid;

use herald_db::Database;
use herald_db::models::UserRow;
use herald_session::Session;
use herald_types::api::{
    ApiResponse, AuthResponse, Claims, LoginRequest, ProfileResponse, RegisterRequest,
};
use herald_types::models::User;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub session: Session,
    pub jwt_secret: String,
    /// Lifetime of issued tokens
    pub token_ttl: chrono::Duration,
}

const MIN_PASSWORD_LEN: usize = 8;

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<AuthResponse>>), ApiError> {
    let Json(req) = payload?;

    let (Some(name), Some(email), Some(password)) = (
        non_empty(req.name),
        non_empty(req.email),
        non_empty(req.password),
    ) else {
        return Err(ApiError::Validation(
            "Name, email and password are required".into(),
        ));
    };
    let email = normalize_email(&email);
    if !email.contains('@') {
        return Err(ApiError::Validation("Email address is invalid".into()));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    if state.db.get_user_by_email(&email)?.is_some() {
        return Err(ApiError::Conflict(
            "User with this email already exists".into(),
        ));
    }

    let password_hash = hash_password(&password)?;
    let user_id = Uuid::new_v4();

    state
        .db
        .create_user(&user_id.to_string(), &name, &email, &password_hash)?;

    let user = User {
        id: user_id,
        name,
        email,
    };
    let token = create_token(&state, &user)?;
    info!("Registered user {}", user.email);

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message(
            "User registered successfully",
            AuthResponse { user, token },
        )),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<AuthResponse>>, ApiError> {
    let Json(req) = payload?;

    let (Some(email), Some(password)) = (non_empty(req.email), non_empty(req.password)) else {
        return Err(ApiError::Validation(
            "Email and password are required".into(),
        ));
    };

    let row = state
        .db
        .get_user_by_email(&normalize_email(&email))?
        .ok_or(ApiError::InvalidCredentials)?;

    verify_password(&password, &row.password)?;

    let user = user_from_row(row)?;
    let token = create_token(&state, &user)?;

    Ok(Json(ApiResponse::with_message(
        "Login successful",
        AuthResponse { user, token },
    )))
}

pub async fn profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ApiResponse<ProfileResponse>>, ApiError> {
    let row = state
        .db
        .get_user_by_id(&claims.sub.to_string())?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    Ok(Json(ApiResponse::data(ProfileResponse {
        user: user_from_row(row)?,
    })))
}

/// Hash a password with Argon2id and a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, stored: &str) -> Result<(), ApiError> {
    let parsed_hash =
        PasswordHash::new(stored).map_err(|e| anyhow::anyhow!("corrupt password hash: {}", e))?;

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::InvalidCredentials)
}

pub fn create_token(state: &AppStateInner, user: &User) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user.id,
        email: user.email.clone(),
        exp: (chrono::Utc::now() + state.token_ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(state.jwt_secret.as_bytes()),
    )
    .map_err(anyhow::Error::from)?;

    Ok(token)
}

fn user_from_row(row: UserRow) -> Result<User, ApiError> {
    let id: Uuid = row
        .id
        .parse()
        .map_err(|e| anyhow::anyhow!("corrupt user id '{}': {}", row.id, e))?;
    Ok(User {
        id,
        name: row.name,
        email: row.email,
    })
}

fn non_empty(field: Option<String>) -> Option<String> {
    field.filter(|v| !v.trim().is_empty())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
