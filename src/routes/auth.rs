use axum::{extract::State, Json};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    auth::{password, AuthenticatedUser, Role},
    error::{AppError, AppResult},
    models::User,
    schema::users::dsl,
    state::AppState,
};

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// A user as returned to clients; never carries the password hash.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub full_name: String,
    pub nip: String,
    pub role: Role,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl TryFrom<User> for UserResponse {
    type Error = AppError;

    fn try_from(user: User) -> Result<Self, Self::Error> {
        let role = user.role.parse().map_err(AppError::internal)?;
        Ok(Self {
            id: user.id,
            username: user.username,
            full_name: user.full_name,
            nip: user.nip,
            role,
            email: user.email,
            phone: user.phone,
            created_at: user.created_at,
            updated_at: user.updated_at,
        })
    }
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: UserResponse,
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let mut conn = state.db()?;

    let user: Option<User> = dsl::users
        .filter(dsl::username.eq(payload.username.trim()))
        .first(&mut conn)
        .optional()?;

    // unknown usernames and wrong passwords are indistinguishable to the client
    let Some(user) = user else {
        tracing::info!(username = %payload.username, "login rejected: unknown user");
        return Err(AppError::unauthorized());
    };

    let valid = password::verify_password(&payload.password, &user.password_hash)
        .map_err(|_| AppError::unauthorized())?;

    if !valid {
        tracing::info!(user_id = user.id, "login rejected: wrong password");
        return Err(AppError::unauthorized());
    }

    let user = UserResponse::try_from(user)?;
    let access_token = state
        .jwt
        .generate_token(user.id, &user.username, user.role.as_str())
        .map_err(AppError::from)?;

    tracing::info!(user_id = user.id, role = %user.role, "user logged in");

    Ok(Json(LoginResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.jwt.expires_in(),
        user,
    }))
}

pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<UserResponse>> {
    let mut conn = state.db()?;
    let record: User = dsl::users
        .find(user.user_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_with("user not found"))?;

    Ok(Json(UserResponse::try_from(record)?))
}
