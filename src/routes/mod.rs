//! HTTP route handlers.
//!
//! Everything under `/api/whatsapp` sits behind
//! [`crate::auth::require_api_token`]. Only [`health::root`] and the optional
//! static directory are public.

pub mod connection;
pub mod health;
pub mod messages;
pub mod spreadsheet;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Extension, Router,
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::auth::{self, ApiToken};
use crate::AppState;

/// Prefix shared by every authenticated endpoint.
pub const API_PREFIX: &str = "/api/whatsapp";

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    let server = &state.config.server;

    let api = Router::new()
        .route("/send/text", post(messages::send_text))
        .route("/send/media", post(messages::send_media))
        .route("/send/bulk", post(messages::send_bulk))
        .route("/status", get(connection::status))
        .route("/qr", get(connection::qr))
        .route("/auth", post(connection::authenticate))
        .route("/connect", post(connection::connect))
        .route("/disconnect", post(connection::disconnect))
        .route("/upload-excel", post(spreadsheet::upload_excel))
        .route("/download-template", get(spreadsheet::download_template))
        .layer(DefaultBodyLimit::max(server.max_upload_bytes))
        .layer(middleware::from_fn(auth::require_api_token));

    let mut app = Router::new()
        .route("/", get(health::root))
        .nest(API_PREFIX, api);

    if let Some(dir) = &server.static_dir {
        app = app.fallback_service(ServeDir::new(crate::util::expand_path(dir)));
    }

    let app = app
        .layer(Extension(ApiToken(state.config.auth.api_token.clone())))
        .layer(TraceLayer::new_for_http());
    let app = if server.cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    };

    app.with_state(state)
}
