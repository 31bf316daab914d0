use std::{num::NonZeroU32, time::Duration};

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use askama::Template;
use axum::{
    Extension, Router, middleware,
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use diesel_async::RunQueryDsl;
use rand_core::OsRng;
use serde::Deserialize;
use tower_sessions::Session;

use crate::db::PgPool;
use crate::errors::AppError;
use crate::logging::{SanitizedEmail, SanitizedUsername, SecurityEvent};
use crate::messages::{self, Level, Message};
use crate::models::user::{
    NewUser, User, ensure_valid_email, ensure_valid_password, ensure_valid_username,
};
use crate::schema::users::dsl::{username as users_username, users};
use crate::security::auth::{self, MaybeUser};
use crate::security::form::ValidatedForm;
use crate::security::rate_limit::{RateLimiterState, enforce_rate_limit};
use crate::templates::render;

pub fn router() -> Router {
    Router::new()
        .route(
            "/register/",
            get(register_form).post(create_account).layer(
                middleware::from_fn_with_state(
                    RateLimiterState::new(
                        NonZeroU32::new(5).expect("burst must be non-zero"),
                        Duration::from_secs(5 * 60),
                    ),
                    enforce_rate_limit,
                ),
            ),
        )
        .route(
            "/login/",
            get(login_form).post(login).layer(middleware::from_fn_with_state(
                RateLimiterState::new(
                    NonZeroU32::new(10).expect("burst must be non-zero"),
                    Duration::from_secs(60),
                ),
                enforce_rate_limit,
            )),
        )
        .route("/logout/", get(logout).post(logout))
        .route("/protected/", get(protected))
}

#[derive(Template)]
#[template(path = "register.html")]
struct RegisterPage {
    messages: Vec<Message>,
    current_user: Option<String>,
    error: Option<String>,
    username: String,
    email: String,
}

#[derive(Template)]
#[template(path = "login.html")]
struct LoginPage {
    messages: Vec<Message>,
    current_user: Option<String>,
    username: String,
}

#[derive(Template)]
#[template(path = "protected.html")]
struct ProtectedPage {
    messages: Vec<Message>,
    current_user: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterForm {
    username: String,
    email: String,
    password1: String,
    password2: String,
}

impl RegisterForm {
    fn validate(&mut self) -> Result<(), String> {
        self.username = self.username.trim().to_string();
        ensure_valid_username(&self.username).map_err(|err| err.to_string())?;

        self.email = self.email.trim().to_lowercase();
        ensure_valid_email(&self.email).map_err(|err| err.to_string())?;

        if self.password1 != self.password2 {
            return Err("the two password fields do not match".to_string());
        }

        ensure_valid_password(&self.password1).map_err(|err| err.to_string())?;

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginForm {
    username: String,
    password: String,
}

impl LoginForm {
    fn validate(&mut self) -> Result<(), String> {
        self.username = self.username.trim().to_string();
        if self.username.is_empty() {
            return Err("username must not be empty".to_string());
        }

        if self.password.is_empty() {
            return Err("password must not be empty".to_string());
        }

        if self.password.chars().count() > 256 {
            return Err("password must not exceed 256 characters".to_string());
        }

        Ok(())
    }
}

async fn register_form(
    session: Session,
    MaybeUser(user): MaybeUser,
) -> Result<Response, AppError> {
    let page = RegisterPage {
        messages: messages::take(&session).await?,
        current_user: user.map(|u| u.username),
        error: None,
        username: String::new(),
        email: String::new(),
    };
    Ok(render(&page)?.into_response())
}

#[tracing::instrument(
    name = "register_account",
    skip(pool, session, form),
    fields(username, email, user_id)
)]
async fn create_account(
    Extension(pool): Extension<PgPool>,
    session: Session,
    ValidatedForm(mut form): ValidatedForm<RegisterForm>,
) -> Result<Response, AppError> {
    if let Err(reason) = form.validate() {
        let page = RegisterPage {
            messages: messages::take(&session).await?,
            current_user: None,
            error: Some(reason),
            username: form.username,
            email: form.email,
        };
        return Ok(render(&page)?.into_response());
    }

    let username = form.username.clone();
    let email = form.email.clone();

    // Record sanitized info in the current span
    tracing::Span::current().record(
        "username",
        tracing::field::display(SanitizedUsername::new(&username)),
    );
    tracing::Span::current().record(
        "email",
        tracing::field::display(SanitizedEmail::new(&email)),
    );

    tracing::debug!(
        username = %SanitizedUsername::new(&username),
        email = %SanitizedEmail::new(&email),
        "Processing registration request"
    );

    let password_hash = {
        let password_string = form.password1.clone();
        tokio::task::spawn_blocking(move || -> Result<String, AppError> {
            let salt = SaltString::generate(&mut OsRng);
            let argon2 = Argon2::default();
            let hash = argon2
                .hash_password(password_string.as_bytes(), &salt)
                .map_err(|err| AppError::PasswordHashing(err.to_string()))?;
            Ok(hash.to_string())
        })
        .await
        .map_err(|err| AppError::Validation(err.to_string()))??
    };

    let mut new_user = NewUser {
        username: username.clone(),
        email: email.clone(),
        password_hash,
    };

    new_user
        .validate()
        .map_err(|err| AppError::Validation(err.to_string()))?;

    let mut conn = pool
        .get()
        .await
        .map_err(|err| AppError::Pool(err.to_string()))?;

    let inserted: Result<User, AppError> = diesel::insert_into(users)
        .values(&new_user)
        .get_result(&mut conn)
        .await
        .map_err(AppError::from_diesel);

    let user = match inserted {
        Ok(user) => user,
        Err(AppError::Conflict(_)) => {
            crate::log_security_event!(
                SecurityEvent::RegistrationFailure,
                username = %SanitizedUsername::new(&username),
                reason = "username_taken",
                "User registration failed"
            );

            let page = RegisterPage {
                messages: messages::take(&session).await?,
                current_user: None,
                error: Some("that username is already taken".to_string()),
                username: form.username,
                email: form.email,
            };
            return Ok(render(&page)?.into_response());
        }
        Err(other) => {
            crate::log_security_event!(
                SecurityEvent::RegistrationFailure,
                username = %SanitizedUsername::new(&username),
                email = %SanitizedEmail::new(&email),
                error = %other,
                "User registration failed"
            );
            return Err(other);
        }
    };

    tracing::Span::current().record("user_id", user.id);

    crate::log_security_event!(
        SecurityEvent::RegistrationSuccess,
        user_id = user.id,
        username = %SanitizedUsername::new(&username),
        email = %SanitizedEmail::new(&email),
        "User registered successfully"
    );

    messages::push(
        &session,
        Level::Success,
        format!("Account created for {username}!"),
    )
    .await?;

    Ok(Redirect::to("/login/").into_response())
}

async fn login_form(session: Session, MaybeUser(user): MaybeUser) -> Result<Response, AppError> {
    let page = LoginPage {
        messages: messages::take(&session).await?,
        current_user: user.map(|u| u.username),
        username: String::new(),
    };
    Ok(render(&page)?.into_response())
}

#[tracing::instrument(name = "login_user", skip(pool, session, form), fields(username, user_id))]
async fn login(
    Extension(pool): Extension<PgPool>,
    session: Session,
    ValidatedForm(mut form): ValidatedForm<LoginForm>,
) -> Result<Response, AppError> {
    if form.validate().is_err() {
        return failed_login_page(&session, form.username).await;
    }

    let entered_username = form.username.clone();

    // Record sanitized username in span
    tracing::Span::current().record(
        "username",
        tracing::field::display(SanitizedUsername::new(&entered_username)),
    );

    tracing::debug!(
        username = %SanitizedUsername::new(&entered_username),
        "Processing login request"
    );

    let mut conn = pool
        .get()
        .await
        .map_err(|err| AppError::Pool(err.to_string()))?;

    let user: User = match users
        .filter(users_username.eq(&entered_username))
        .first(&mut conn)
        .await
    {
        Ok(user) => user,
        Err(DieselError::NotFound) => {
            crate::log_security_event!(
                SecurityEvent::LoginFailure,
                username = %SanitizedUsername::new(&entered_username),
                reason = "user_not_found",
                "Login failed: user not found"
            );
            return failed_login_page(&session, form.username).await;
        }
        Err(other) => {
            tracing::error!(
                username = %SanitizedUsername::new(&entered_username),
                error = %other,
                "Database error during login"
            );
            return Err(AppError::Database(other));
        }
    };

    tracing::Span::current().record("user_id", user.id);

    let Ok(password_hash) = PasswordHash::new(&user.password_hash) else {
        crate::log_security_event!(
            SecurityEvent::LoginFailure,
            user_id = user.id,
            reason = "invalid_password_hash",
            "Login failed: invalid password hash"
        );
        return failed_login_page(&session, form.username).await;
    };

    if Argon2::default()
        .verify_password(form.password.as_bytes(), &password_hash)
        .is_err()
    {
        crate::log_security_event!(
            SecurityEvent::LoginFailure,
            user_id = user.id,
            username = %SanitizedUsername::new(&entered_username),
            reason = "incorrect_password",
            "Login failed: incorrect password"
        );
        return failed_login_page(&session, form.username).await;
    }

    auth::establish(&session, &user).await?;

    crate::log_security_event!(
        SecurityEvent::LoginSuccess,
        user_id = user.id,
        username = %SanitizedUsername::new(&entered_username),
        "User logged in successfully"
    );

    messages::push(
        &session,
        Level::Info,
        format!("You are now logged in as {}.", user.username),
    )
    .await?;

    Ok(Redirect::to("/").into_response())
}

/// Bad credentials re-render the login form with a flash error; the
/// message never says whether the username or the password was wrong.
async fn failed_login_page(session: &Session, username: String) -> Result<Response, AppError> {
    messages::push(session, Level::Error, "Invalid username or password.").await?;

    let page = LoginPage {
        messages: messages::take(session).await?,
        current_user: None,
        username,
    };
    Ok(render(&page)?.into_response())
}

async fn logout(session: Session) -> Result<Redirect, AppError> {
    auth::clear(&session).await?;

    crate::log_security_event!(SecurityEvent::LogoutSuccess, "User logged out");

    messages::push(&session, Level::Info, "You have successfully logged out.").await?;

    Ok(Redirect::to("/"))
}

async fn protected(session: Session, MaybeUser(user): MaybeUser) -> Result<Response, AppError> {
    let Some(user) = user else {
        return Ok(Redirect::to("/login/").into_response());
    };

    let page = ProtectedPage {
        messages: messages::take(&session).await?,
        current_user: Some(user.username),
    };
    Ok(render(&page)?.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register_form_fixture() -> RegisterForm {
        RegisterForm {
            username: "jane".to_string(),
            email: "jane@example.com".to_string(),
            password1: "correct-horse-7".to_string(),
            password2: "correct-horse-7".to_string(),
        }
    }

    #[test]
    fn test_register_form_accepts_matching_passwords() {
        let mut form = register_form_fixture();
        assert!(form.validate().is_ok());
    }

    #[test]
    fn test_register_form_rejects_mismatched_confirmation() {
        let mut form = register_form_fixture();
        form.password2 = "something-else-9".to_string();

        let err = form.validate().unwrap_err();
        assert!(err.contains("do not match"));
    }

    #[test]
    fn test_register_form_rejects_weak_password() {
        let mut form = register_form_fixture();
        form.password1 = "1234567890".to_string();
        form.password2 = "1234567890".to_string();
        assert!(form.validate().is_err());
    }

    #[test]
    fn test_register_form_normalizes_username_and_email() {
        let mut form = register_form_fixture();
        form.username = " jane ".to_string();
        form.email = "Jane@Example.COM".to_string();

        form.validate().unwrap();
        assert_eq!(form.username, "jane");
        assert_eq!(form.email, "jane@example.com");
    }

    #[test]
    fn test_login_form_requires_both_fields() {
        let mut form = LoginForm {
            username: "  ".to_string(),
            password: "secret".to_string(),
        };
        assert!(form.validate().is_err());

        let mut form = LoginForm {
            username: "jane".to_string(),
            password: String::new(),
        };
        assert!(form.validate().is_err());

        let mut form = LoginForm {
            username: "jane".to_string(),
            password: "secret".to_string(),
        };
        assert!(form.validate().is_ok());
    }
}
