use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::schema::notes;

use super::{ModelValidationError, ValidationResult};

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = notes)]
pub struct Note {
    pub id: i32,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = notes)]
pub struct NewNote {
    pub title: String,
    pub content: String,
}

impl NewNote {
    /// Notes accept arbitrary text; the only constraint is the title
    /// column's declared maximum.
    pub fn validate(&self) -> ValidationResult<()> {
        ensure_title_fits(&self.title)
    }
}

pub(crate) fn ensure_title_fits(value: &str) -> ValidationResult<()> {
    if value.chars().count() > 200 {
        return Err(ModelValidationError::InvalidNoteTitle);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_at_column_maximum_is_accepted() {
        assert!(ensure_title_fits(&"x".repeat(200)).is_ok());
    }

    #[test]
    fn test_title_over_column_maximum_is_rejected() {
        assert!(ensure_title_fits(&"x".repeat(201)).is_err());
    }

    #[test]
    fn test_empty_title_and_content_are_accepted() {
        let note = NewNote {
            title: String::new(),
            content: String::new(),
        };
        assert!(note.validate().is_ok());
    }

    #[test]
    fn test_multibyte_title_counts_characters_not_bytes() {
        // 200 four-byte characters still fit the 200-character column.
        assert!(ensure_title_fits(&"🗒".repeat(200)).is_ok());
        assert!(ensure_title_fits(&"🗒".repeat(201)).is_err());
    }
}
