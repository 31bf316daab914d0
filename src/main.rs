mod db;
mod errors;
mod logging;
mod messages;
mod models;
mod routes;
mod schema;
mod security;
mod templates;

use std::net::SocketAddr;

use axum::{Extension, Router, extract::DefaultBodyLimit, middleware, serve};
use db::establish_pool;
use routes::create_router;
use tokio::net::TcpListener;
use tower_sessions::{
    Expiry, MemoryStore, SessionManagerLayer,
    cookie::{SameSite, time::Duration},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let pool = establish_pool().await?;

    // Lax keeps the cookie on top-level navigations while blocking
    // cross-site form posts.
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_name("sessionid")
        .with_same_site(SameSite::Lax)
        .with_secure(false)
        .with_expiry(Expiry::OnInactivity(Duration::weeks(2)));

    let router: Router = create_router()
        .layer(middleware::from_fn(security::headers::set_security_headers))
        .layer(DefaultBodyLimit::max(security::form::MAX_BODY_SIZE_BYTES))
        .layer(session_layer)
        .layer(Extension(pool.clone()));

    let app = router.into_make_service_with_connect_info::<SocketAddr>();

    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(%addr, "Listening for connections");

    serve(listener, app).await?;

    Ok(())
}
