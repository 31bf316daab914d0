use askama::Template;
use axum::response::Html;

use crate::errors::AppError;

/// Renders an askama page, funneling template failures into [`AppError`]
/// so they surface as logged 500s.
pub fn render<T: Template>(page: &T) -> Result<Html<String>, AppError> {
    Ok(Html(page.render()?))
}
