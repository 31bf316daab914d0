use askama::Template;
use axum::{
    Extension, Router,
    extract::Path,
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Deserialize;
use tower_sessions::Session;

use crate::db::PgPool;
use crate::errors::AppError;
use crate::messages::{self, Message};
use crate::models::note::{NewNote, Note};
use crate::schema::notes::dsl::{
    content as notes_content, id as notes_id, notes as notes_table, title as notes_title,
};
use crate::security::auth::{MaybeUser, RequireUser};
use crate::security::form::ValidatedForm;
use crate::templates::render;

pub fn router() -> Router {
    Router::new()
        .route("/", get(index))
        .route("/notesIndex", get(notes_index))
        .route("/add/", get(add_note_form).post(add_note))
        .route("/post/:id/", get(view_note))
        .route("/edit/:id", get(edit_note_form).post(edit_note))
        .route("/deletePost/:id", get(delete_note).post(delete_note))
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexPage {
    messages: Vec<Message>,
    current_user: Option<String>,
    notes: Vec<Note>,
}

#[derive(Template)]
#[template(path = "notes_index.html")]
struct NotesIndexPage {
    messages: Vec<Message>,
    current_user: Option<String>,
    notes: Vec<Note>,
}

#[derive(Template)]
#[template(path = "add_note.html")]
struct AddNotePage {
    messages: Vec<Message>,
    current_user: Option<String>,
    error: Option<String>,
    title: String,
    content: String,
}

#[derive(Template)]
#[template(path = "view_note.html")]
struct ViewNotePage {
    messages: Vec<Message>,
    current_user: Option<String>,
    note: Note,
}

#[derive(Template)]
#[template(path = "edit_note.html")]
struct EditNotePage {
    messages: Vec<Message>,
    current_user: Option<String>,
    error: Option<String>,
    note_id: i32,
    title: String,
    content: String,
}

#[derive(Template)]
#[template(path = "deleted_note.html")]
struct DeletedNotePage {
    messages: Vec<Message>,
    current_user: Option<String>,
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoteForm {
    title: String,
    content: String,
}

/// Public landing page; lists every note in storage order.
async fn index(
    MaybeUser(user): MaybeUser,
    Extension(pool): Extension<PgPool>,
    session: Session,
) -> Result<Response, AppError> {
    let mut conn = pool
        .get()
        .await
        .map_err(|err| AppError::Pool(err.to_string()))?;

    let results = notes_table
        .load::<Note>(&mut conn)
        .await
        .map_err(AppError::from_diesel)?;

    let page = IndexPage {
        messages: messages::take(&session).await?,
        current_user: user.map(|u| u.username),
        notes: results,
    };
    Ok(render(&page)?.into_response())
}

async fn notes_index(
    RequireUser(user): RequireUser,
    Extension(pool): Extension<PgPool>,
    session: Session,
) -> Result<Response, AppError> {
    let mut conn = pool
        .get()
        .await
        .map_err(|err| AppError::Pool(err.to_string()))?;

    let results = notes_table
        .load::<Note>(&mut conn)
        .await
        .map_err(AppError::from_diesel)?;

    let page = NotesIndexPage {
        messages: messages::take(&session).await?,
        current_user: Some(user.username),
        notes: results,
    };
    Ok(render(&page)?.into_response())
}

async fn add_note_form(
    RequireUser(user): RequireUser,
    session: Session,
) -> Result<Response, AppError> {
    let page = AddNotePage {
        messages: messages::take(&session).await?,
        current_user: Some(user.username),
        error: None,
        title: String::new(),
        content: String::new(),
    };
    Ok(render(&page)?.into_response())
}

#[tracing::instrument(name = "add_note", skip(user, pool, session, form))]
async fn add_note(
    RequireUser(user): RequireUser,
    Extension(pool): Extension<PgPool>,
    session: Session,
    ValidatedForm(form): ValidatedForm<NoteForm>,
) -> Result<Response, AppError> {
    let new_note = NewNote {
        title: form.title,
        content: form.content,
    };

    if let Err(reason) = new_note.validate() {
        let page = AddNotePage {
            messages: messages::take(&session).await?,
            current_user: Some(user.username),
            error: Some(reason.to_string()),
            title: new_note.title,
            content: new_note.content,
        };
        return Ok(render(&page)?.into_response());
    }

    let mut conn = pool
        .get()
        .await
        .map_err(|err| AppError::Pool(err.to_string()))?;

    diesel::insert_into(notes_table)
        .values(&new_note)
        .execute(&mut conn)
        .await
        .map_err(AppError::from_diesel)?;

    tracing::debug!("Note created");

    Ok(Redirect::to("/notesIndex").into_response())
}

async fn view_note(
    RequireUser(user): RequireUser,
    Extension(pool): Extension<PgPool>,
    session: Session,
    Path(note_id): Path<i32>,
) -> Result<Response, AppError> {
    let mut conn = pool
        .get()
        .await
        .map_err(|err| AppError::Pool(err.to_string()))?;

    let note = notes_table
        .filter(notes_id.eq(note_id))
        .first::<Note>(&mut conn)
        .await
        .map_err(AppError::from_diesel)?;

    let page = ViewNotePage {
        messages: messages::take(&session).await?,
        current_user: Some(user.username),
        note,
    };
    Ok(render(&page)?.into_response())
}

async fn edit_note_form(
    RequireUser(user): RequireUser,
    Extension(pool): Extension<PgPool>,
    session: Session,
    Path(note_id): Path<i32>,
) -> Result<Response, AppError> {
    let mut conn = pool
        .get()
        .await
        .map_err(|err| AppError::Pool(err.to_string()))?;

    let note = notes_table
        .filter(notes_id.eq(note_id))
        .first::<Note>(&mut conn)
        .await
        .map_err(AppError::from_diesel)?;

    let page = EditNotePage {
        messages: messages::take(&session).await?,
        current_user: Some(user.username),
        error: None,
        note_id: note.id,
        title: note.title,
        content: note.content,
    };
    Ok(render(&page)?.into_response())
}

/// Overwrites title and content only; the identifier and creation
/// timestamp are never touched by the update statement.
#[tracing::instrument(name = "edit_note", skip(user, pool, session, form))]
async fn edit_note(
    RequireUser(user): RequireUser,
    Extension(pool): Extension<PgPool>,
    session: Session,
    Path(note_id): Path<i32>,
    ValidatedForm(form): ValidatedForm<NoteForm>,
) -> Result<Response, AppError> {
    let revised = NewNote {
        title: form.title,
        content: form.content,
    };

    if let Err(reason) = revised.validate() {
        let page = EditNotePage {
            messages: messages::take(&session).await?,
            current_user: Some(user.username),
            error: Some(reason.to_string()),
            note_id,
            title: revised.title,
            content: revised.content,
        };
        return Ok(render(&page)?.into_response());
    }

    let mut conn = pool
        .get()
        .await
        .map_err(|err| AppError::Pool(err.to_string()))?;

    let note: Note = diesel::update(notes_table.filter(notes_id.eq(note_id)))
        .set((
            notes_title.eq(&revised.title),
            notes_content.eq(&revised.content),
        ))
        .get_result(&mut conn)
        .await
        .map_err(AppError::from_diesel)?;

    Ok(Redirect::to(&format!("/post/{}/", note.id)).into_response())
}

/// Removes the note on either verb and renders a confirmation page,
/// responding 404 when the identifier matches nothing.
async fn delete_note(
    RequireUser(user): RequireUser,
    Extension(pool): Extension<PgPool>,
    session: Session,
    Path(note_id): Path<i32>,
) -> Result<Response, AppError> {
    let mut conn = pool
        .get()
        .await
        .map_err(|err| AppError::Pool(err.to_string()))?;

    let note = notes_table
        .filter(notes_id.eq(note_id))
        .first::<Note>(&mut conn)
        .await
        .map_err(AppError::from_diesel)?;

    diesel::delete(notes_table.filter(notes_id.eq(note_id)))
        .execute(&mut conn)
        .await
        .map_err(AppError::from_diesel)?;

    tracing::debug!(note_id, "Note deleted");

    let page = DeletedNotePage {
        messages: messages::take(&session).await?,
        current_user: Some(user.username),
        title: note.title,
    };
    Ok(render(&page)?.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use chrono::Utc;
    use tower::ServiceExt;

    async fn assert_redirects_to_login(uri: &str) {
        let response = router()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER, "uri: {uri}");
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/login/",
            "uri: {uri}"
        );
    }

    #[tokio::test]
    async fn test_gated_routes_redirect_anonymous_requests_to_login() {
        assert_redirects_to_login("/notesIndex").await;
        assert_redirects_to_login("/add/").await;
        assert_redirects_to_login("/post/1/").await;
        assert_redirects_to_login("/edit/1").await;
        assert_redirects_to_login("/deletePost/1").await;
    }

    fn note_fixture(id: i32, title: &str, content: &str) -> Note {
        Note {
            id,
            title: title.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_index_page_renders_every_note() {
        let page = IndexPage {
            messages: Vec::new(),
            current_user: None,
            notes: vec![
                note_fixture(1, "Groceries", "milk and eggs"),
                note_fixture(2, "Ideas", "write more tests"),
            ],
        };

        let html = page.render().unwrap();
        assert!(html.contains("Groceries"));
        assert!(html.contains("Ideas"));
        assert!(html.contains("/post/1/"));
        assert!(html.contains("/post/2/"));
    }

    #[test]
    fn test_index_page_with_no_notes_shows_empty_state() {
        let page = IndexPage {
            messages: Vec::new(),
            current_user: None,
            notes: Vec::new(),
        };

        let html = page.render().unwrap();
        assert!(html.contains("No notes yet"));
    }

    #[test]
    fn test_note_content_is_html_escaped() {
        let page = ViewNotePage {
            messages: Vec::new(),
            current_user: Some("jane".to_string()),
            note: note_fixture(3, "<script>alert(1)</script>", "<b>bold</b>"),
        };

        let html = page.render().unwrap();
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>alert"));
        assert!(!html.contains("<b>bold</b>"));
    }

    #[test]
    fn test_deleted_page_names_the_removed_note() {
        let page = DeletedNotePage {
            messages: Vec::new(),
            current_user: Some("jane".to_string()),
            title: "Groceries".to_string(),
        };

        let html = page.render().unwrap();
        assert!(html.contains("Groceries"));
    }
}
