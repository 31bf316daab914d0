use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;

use crate::errors::AppError;
use crate::logging::SecurityEvent;
use crate::models::user::User;

/// Session key holding the logged-in identity.
const SESSION_USER_KEY: &str = "auth_user";

/// The identity stored in the session cookie once login succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: i32,
    pub username: String,
}

/// Writes the login state into the session. The session id is cycled so a
/// pre-login cookie cannot be replayed as an authenticated one.
pub async fn establish(session: &Session, user: &User) -> Result<(), AppError> {
    session.cycle_id().await?;
    session
        .insert(
            SESSION_USER_KEY,
            SessionUser {
                id: user.id,
                username: user.username.clone(),
            },
        )
        .await?;
    Ok(())
}

/// Destroys the session record and clears the cookie state.
pub async fn clear(session: &Session) -> Result<(), AppError> {
    session.flush().await?;
    Ok(())
}

pub async fn current_user(session: &Session) -> Result<Option<SessionUser>, AppError> {
    Ok(session.get::<SessionUser>(SESSION_USER_KEY).await?)
}

/// Extractor for handlers gated behind login. Anonymous requests are
/// redirected to the login page instead of receiving an error body.
#[derive(Debug, Clone)]
pub struct RequireUser(pub SessionUser);

/// Rejection that sends the browser to the login form.
#[derive(Debug)]
pub struct LoginRedirect;

impl IntoResponse for LoginRedirect {
    fn into_response(self) -> Response {
        crate::log_security_event!(
            SecurityEvent::UnauthorizedAccess,
            "Anonymous request to a gated route redirected to login"
        );
        Redirect::to("/login/").into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequireUser
where
    S: Send + Sync,
{
    type Rejection = LoginRedirect;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|_| LoginRedirect)?;

        match session.get::<SessionUser>(SESSION_USER_KEY).await {
            Ok(Some(user)) => Ok(RequireUser(user)),
            Ok(None) | Err(_) => Err(LoginRedirect),
        }
    }
}

/// Login state for pages that render either way. Never rejects; any
/// session failure degrades to the anonymous view.
#[derive(Debug, Clone, Default)]
pub struct MaybeUser(pub Option<SessionUser>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Ok(session) = Session::from_request_parts(parts, state).await else {
            return Ok(MaybeUser(None));
        };

        match session.get::<SessionUser>(SESSION_USER_KEY).await {
            Ok(user) => Ok(MaybeUser(user)),
            Err(err) => {
                tracing::warn!(error = %err, "Failed to read login state from session");
                Ok(MaybeUser(None))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;
    use tower_sessions::MemoryStore;

    fn fixture_user() -> User {
        User {
            id: 7,
            username: "jane".to_string(),
            email: "jane@example.com".to_string(),
            password_hash: "$argon2id$stub".to_string(),
            created_at: Utc::now(),
        }
    }

    fn fresh_session() -> Session {
        Session::new(None, Arc::new(MemoryStore::default()), None)
    }

    #[tokio::test]
    async fn test_establish_then_current_user_roundtrip() {
        let session = fresh_session();
        let user = fixture_user();

        establish(&session, &user).await.unwrap();

        let current = current_user(&session).await.unwrap().unwrap();
        assert_eq!(current.id, 7);
        assert_eq!(current.username, "jane");
    }

    #[tokio::test]
    async fn test_clear_removes_login_state() {
        let session = fresh_session();
        let user = fixture_user();

        establish(&session, &user).await.unwrap();
        clear(&session).await.unwrap();

        assert!(current_user(&session).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_anonymous_session_has_no_user() {
        let session = fresh_session();
        assert!(current_user(&session).await.unwrap().is_none());
    }
}
