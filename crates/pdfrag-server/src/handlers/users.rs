use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i32,
    pub email: String,
    pub api_key: String,
    pub created_at: DateTime<Utc>,
}

fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// POST /users
pub async fn create_user_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let email = request.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::BadRequest(format!("invalid email: {}", email)));
    }

    let api_key = generate_api_key();
    let user = state.repository.create_user(email, &api_key).await?;

    info!("Created user {} ({})", user.id, user.email);

    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            id: user.id,
            email: user.email,
            api_key: user.api_key,
            created_at: user.created_at,
        }),
    ))
}

/// GET /users/{id}
pub async fn get_user_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i32>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state
        .repository
        .get_user(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("user {}", user_id)))?;

    Ok(Json(UserResponse {
        id: user.id,
        email: user.email,
        api_key: user.api_key,
        created_at: user.created_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_keys_are_64_hex_chars_and_unique() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
