pub mod note;
pub mod user;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelValidationError {
    #[error("username must be 1-150 characters consisting of letters, digits, or @/./+/-/_")]
    InvalidUsername,
    #[error("email must contain a single '@' and a domain section")]
    InvalidEmail,
    #[error("password must be at least 8 characters and not entirely numeric")]
    WeakPassword,
    #[error("note title must be at most 200 characters")]
    InvalidNoteTitle,
}

pub type ValidationResult<T> = Result<T, ModelValidationError>;
