//! Request authentication.
//!
//! Token issuance and verification belong to the external auth service;
//! the core only needs to resolve an opaque bearer token to a known user
//! before anything else runs.  Here the token is the user's id, checked
//! against the store.  WebSocket upgrades authenticate the same way via a
//! `token` query parameter, before the connection enters the presence
//! registry.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tokio::sync::Mutex;

use courier_shared::UserId;
use courier_store::Database;

use crate::api::AppState;
use crate::error::ApiError;

/// The authenticated caller, inserted into request extensions by
/// [`auth_middleware`].
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub UserId);

/// Resolve a bearer token to a known user, or fail with 401.
pub async fn authenticate_token(
    db: &Arc<Mutex<Database>>,
    token: &str,
) -> Result<UserId, ApiError> {
    let user_id = UserId::parse(token.trim())
        .map_err(|_| ApiError::Unauthorized("Malformed token".into()))?;

    let known = db.lock().await.user_exists(user_id)?;
    if !known {
        return Err(ApiError::Unauthorized("Unknown user".into()));
    }

    Ok(user_id)
}

/// Axum middleware guarding the REST surface.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".into()))?
        .to_string();

    let user = authenticate_token(&state.db, &token).await?;
    req.extensions_mut().insert(AuthUser(user));

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use courier_shared::User;

    async fn db_with_user() -> (Arc<Mutex<Database>>, UserId) {
        let db = Arc::new(Mutex::new(Database::in_memory().unwrap()));
        let user = User {
            id: UserId::new(),
            full_name: "Ada".into(),
            profile_pic: String::new(),
            created_at: Utc::now(),
        };
        db.lock().await.insert_user(&user).unwrap();
        (db, user.id)
    }

    #[tokio::test]
    async fn known_user_token_is_accepted() {
        let (db, user) = db_with_user().await;
        let resolved = authenticate_token(&db, &user.to_string()).await.unwrap();
        assert_eq!(resolved, user);
    }

    #[tokio::test]
    async fn unknown_user_is_unauthorized() {
        let (db, _) = db_with_user().await;
        let err = authenticate_token(&db, &UserId::new().to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn malformed_token_is_unauthorized() {
        let (db, _) = db_with_user().await;
        let err = authenticate_token(&db, "not-a-uuid").await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }
}
