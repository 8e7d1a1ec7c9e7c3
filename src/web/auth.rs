//! Bearer-token authentication for the JSON API.
//!
//! Every caller presents an API token issued by the administrator; the
//! token resolves to a user record, and that user is passed explicitly
//! into every operation. The admin's own token is installed from the
//! environment at startup.

use axum::http::HeaderMap;
use tracing::info;

use crate::error::{PlusError, Result};
use crate::models::User;
use crate::state::SharedPlusDatabase;

/// Extract the bearer token from the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
}

/// Resolve the calling user from the request headers.
pub async fn resolve_caller(headers: &HeaderMap, db: &SharedPlusDatabase) -> Result<User> {
    let token = bearer_token(headers)
        .ok_or_else(|| PlusError::access_denied("Not logged in."))?;

    let db = db.read().await;
    db.find_user_by_token(&token)
        .cloned()
        .ok_or_else(|| PlusError::access_denied("Not logged in."))
}

/// Issue a fresh API token for a registered user, revoking any token
/// they held before.
pub async fn issue_token(
    db: &SharedPlusDatabase,
    db_path: &str,
    discord_id: &str,
) -> Result<String> {
    let mut db = db.write().await;
    if db.find_user(discord_id).is_none() {
        return Err(PlusError::invalid_input(format!(
            "No registered user with the id {discord_id}"
        )));
    }

    db.api_tokens.retain(|_, owner| owner != discord_id);
    let token = uuid::Uuid::new_v4().to_string();
    db.api_tokens.insert(token.clone(), discord_id.to_string());
    db.touch();
    db.save(db_path).await?;

    info!("Issued a new API token for {}", discord_id);
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{create_shared_plus_database, PlusDatabase};

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            value.parse().unwrap(),
        );
        headers
    }

    #[test]
    fn bearer_token_requires_the_scheme() {
        assert_eq!(
            bearer_token(&headers_with("Bearer abc123")),
            Some("abc123".to_string())
        );
        assert_eq!(bearer_token(&headers_with("Basic abc123")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn unknown_tokens_are_denied() {
        let db = create_shared_plus_database(PlusDatabase::new());
        let err = resolve_caller(&headers_with("Bearer nope"), &db)
            .await
            .unwrap_err();
        assert!(matches!(err, PlusError::AccessDenied { .. }));
    }

    #[tokio::test]
    async fn issued_tokens_resolve_and_replace() {
        let db = create_shared_plus_database(PlusDatabase::new());
        db.write()
            .await
            .upsert_user(User::new("123".to_string(), "someone".to_string()));
        let path = std::env::temp_dir()
            .join(format!("plus-auth-{}.json", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .into_owned();

        let first = issue_token(&db, &path, "123").await.unwrap();
        let caller = resolve_caller(&headers_with(&format!("Bearer {first}")), &db)
            .await
            .unwrap();
        assert_eq!(caller.discord_id, "123");

        // Re-issuing revokes the old token.
        let second = issue_token(&db, &path, "123").await.unwrap();
        assert!(resolve_caller(&headers_with(&format!("Bearer {first}")), &db)
            .await
            .is_err());
        assert!(resolve_caller(&headers_with(&format!("Bearer {second}")), &db)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn tokens_require_a_registered_user() {
        let db = create_shared_plus_database(PlusDatabase::new());
        let path = std::env::temp_dir()
            .join(format!("plus-auth-{}.json", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .into_owned();
        let err = issue_token(&db, &path, "ghost").await.unwrap_err();
        assert!(matches!(err, PlusError::InvalidInput { .. }));
    }
}
