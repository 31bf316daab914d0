use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::schema::users;

use super::{ModelValidationError, ValidationResult};

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

impl NewUser {
    pub fn validate(&mut self) -> ValidationResult<()> {
        self.username = self.username.trim().to_string();
        ensure_valid_username(&self.username)?;

        self.email = self.email.trim().to_lowercase();
        ensure_valid_email(&self.email)?;

        ensure_hash_present(&self.password_hash)?;
        Ok(())
    }
}

pub(crate) fn ensure_valid_username(value: &str) -> ValidationResult<()> {
    let len = value.chars().count();
    if !(1..=150).contains(&len) {
        tracing::debug!(length = len, "Username validation failed: invalid length");
        return Err(ModelValidationError::InvalidUsername);
    }

    let allowed = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'));
    if !allowed {
        tracing::debug!("Username validation failed: contains invalid characters");
        return Err(ModelValidationError::InvalidUsername);
    }
    Ok(())
}

pub(crate) fn ensure_valid_email(value: &str) -> ValidationResult<()> {
    let len = value.len();
    if !(3..=255).contains(&len) {
        tracing::debug!(length = len, "Email validation failed: invalid length");
        return Err(ModelValidationError::InvalidEmail);
    }

    let mut parts = value.split('@');
    let (Some(local), Some(domain)) = (parts.next(), parts.next()) else {
        tracing::debug!("Email validation failed: missing @ or invalid format");
        return Err(ModelValidationError::InvalidEmail);
    };
    if parts.next().is_some() {
        tracing::debug!("Email validation failed: multiple @ symbols");
        return Err(ModelValidationError::InvalidEmail);
    }

    if local.is_empty() || domain.len() < 3 || !domain.contains('.') {
        tracing::debug!(
            local_empty = local.is_empty(),
            domain_length = domain.len(),
            has_dot = domain.contains('.'),
            "Email validation failed: invalid local or domain part"
        );
        return Err(ModelValidationError::InvalidEmail);
    }

    Ok(())
}

pub(crate) fn ensure_valid_password(password: &str) -> ValidationResult<()> {
    let len = password.chars().count();
    if len < 8 {
        tracing::debug!(
            length = len,
            "Password validation failed: too short (minimum 8 characters)"
        );
        return Err(ModelValidationError::WeakPassword);
    }

    if len > 256 {
        tracing::debug!(length = len, "Password validation failed: too long");
        return Err(ModelValidationError::WeakPassword);
    }

    if password.chars().all(|c| c.is_ascii_digit()) {
        tracing::debug!("Password validation failed: entirely numeric");
        return Err(ModelValidationError::WeakPassword);
    }

    Ok(())
}

fn ensure_hash_present(password_hash: &str) -> ValidationResult<()> {
    if password_hash.is_empty() {
        tracing::error!("Password hash is empty during validation");
        Err(ModelValidationError::WeakPassword)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_accepts_django_style_charset() {
        assert!(ensure_valid_username("jane.doe+notes@home_1-2").is_ok());
    }

    #[test]
    fn test_username_rejects_spaces_and_unicode() {
        assert!(ensure_valid_username("jane doe").is_err());
        assert!(ensure_valid_username("jäne").is_err());
        assert!(ensure_valid_username("").is_err());
    }

    #[test]
    fn test_username_rejects_over_150_characters() {
        assert!(ensure_valid_username(&"a".repeat(151)).is_err());
        assert!(ensure_valid_username(&"a".repeat(150)).is_ok());
    }

    #[test]
    fn test_email_structure() {
        assert!(ensure_valid_email("user@example.com").is_ok());
        assert!(ensure_valid_email("user@@example.com").is_err());
        assert!(ensure_valid_email("user@nodot").is_err());
        assert!(ensure_valid_email("@example.com").is_err());
    }

    #[test]
    fn test_password_minimum_length() {
        assert!(ensure_valid_password("short1!").is_err());
        assert!(ensure_valid_password("longenough").is_ok());
    }

    #[test]
    fn test_password_entirely_numeric_is_weak() {
        assert!(ensure_valid_password("12345678901").is_err());
        assert!(ensure_valid_password("1234567890a").is_ok());
    }

    #[test]
    fn test_new_user_normalizes_fields() {
        let mut user = NewUser {
            username: "  jane  ".to_string(),
            email: "  Jane@Example.COM ".to_string(),
            password_hash: "$argon2id$stub".to_string(),
        };
        assert!(user.validate().is_ok());
        assert_eq!(user.username, "jane");
        assert_eq!(user.email, "jane@example.com");
    }
}
