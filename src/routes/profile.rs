use axum::{extract::State, http::StatusCode, Json};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    auth::{password, AuthenticatedUser},
    error::{AppError, AppResult},
    models::User,
    schema::users,
    state::AppState,
};

use super::auth::UserResponse;

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Serialize)]
pub struct UpdateProfileResponse {
    pub message: String,
    pub user: UserResponse,
}

/// Email and phone are always written so that blank input clears them; the
/// password hash is only touched when a new one was supplied.
#[derive(AsChangeset)]
#[diesel(table_name = users)]
struct ProfileChangeset<'a> {
    full_name: &'a str,
    email: Option<Option<&'a str>>,
    phone: Option<Option<&'a str>>,
    password_hash: Option<&'a str>,
    updated_at: NaiveDateTime,
}

const MAX_FULL_NAME_CHARS: usize = 255;
const MAX_EMAIL_CHARS: usize = 255;
const MAX_PHONE_CHARS: usize = 32;

fn ensure_max_chars(field: &str, value: Option<&str>, max: usize) -> AppResult<()> {
    match value {
        Some(value) if value.chars().count() > max => Err(AppError::bad_request(format!(
            "{field} must be at most {max} characters"
        ))),
        _ => Ok(()),
    }
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> AppResult<Json<UpdateProfileResponse>> {
    let full_name = payload.full_name.trim().to_string();
    if full_name.is_empty() {
        return Err(AppError::bad_request("full_name must not be empty"));
    }
    let email = blank_to_none(payload.email);
    let phone = blank_to_none(payload.phone);
    ensure_max_chars("full_name", Some(&full_name), MAX_FULL_NAME_CHARS)?;
    ensure_max_chars("email", email.as_deref(), MAX_EMAIL_CHARS)?;
    ensure_max_chars("phone", phone.as_deref(), MAX_PHONE_CHARS)?;
    let new_password = payload.new_password.filter(|p| !p.is_empty());
    let current_password = payload.current_password.filter(|p| !p.is_empty());

    let mut conn = state.db()?;

    let current: User = users::table
        .find(user.user_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_with("user not found"))?;

    let password_hash = match new_password {
        None => None,
        Some(new_password) => {
            let current_password = current_password.ok_or_else(|| {
                AppError::bad_request("current_password is required to change the password")
            })?;
            let valid = password::verify_password(&current_password, &current.password_hash)
                .map_err(AppError::internal)?;
            if !valid {
                return Err(AppError::new(
                    StatusCode::UNAUTHORIZED,
                    "current password is incorrect",
                ));
            }
            Some(password::hash_password(&new_password)?)
        }
    };

    let changeset = ProfileChangeset {
        full_name: &full_name,
        email: Some(email.as_deref()),
        phone: Some(phone.as_deref()),
        password_hash: password_hash.as_deref(),
        updated_at: Utc::now().naive_utc(),
    };
    let updated: User = diesel::update(users::table.find(user.user_id))
        .set(&changeset)
        .get_result(&mut conn)?;

    tracing::info!(
        user_id = user.user_id,
        password_changed = changeset.password_hash.is_some(),
        "profile updated"
    );

    Ok(Json(UpdateProfileResponse {
        message: "profile updated".to_string(),
        user: UserResponse::try_from(updated)?,
    }))
}
