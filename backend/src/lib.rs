use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer};

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod handlers;
pub mod models;
pub mod reminders;
pub mod store;
pub mod transfer;
pub mod validation;

use crypto::CryptoError;
use store::Store;

/// Request bodies above this size are refused before reaching a handler.
pub const BODY_LIMIT_BYTES: usize = 2 * 1024 * 1024;

pub type AppState = Arc<AppData>;

pub struct AppData {
    pub store: Arc<dyn Store>,
    pub bcrypt_cost: u32,
    /// Checked against on logins for unknown usernames. Hashed at
    /// `bcrypt_cost` so that path costs the same as a wrong password.
    pub dummy_hash: String,
}

impl AppData {
    pub async fn new(store: Arc<dyn Store>, bcrypt_cost: u32) -> Result<AppState, CryptoError> {
        let dummy_hash =
            crypto::hash_password(&crypto::generate_session_token(), bcrypt_cost).await?;
        Ok(Arc::new(Self {
            store,
            bcrypt_cost,
            dummy_hash,
        }))
    }
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/auth/me", get(handlers::me))
        .route("/api/events", get(events::list_events).post(events::create_event))
        .route("/api/events/export", get(transfer::export_events))
        .route("/api/events/import", post(transfer::import_events))
        .route(
            "/api/events/:id",
            get(events::get_event)
                .put(events::update_event)
                .delete(events::delete_event),
        )
        .route("/api/events/:id/reminders", get(reminders::list_reminders))
        .route("/api/reminders", post(reminders::create_reminder))
        .route("/api/reminders/:id", delete(reminders::delete_reminder))
        .route("/api/stats/categories", get(events::category_stats))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_session,
        ));

    Router::new()
        .route("/api/generate-recovery-key", post(handlers::generate_recovery_key))
        .route("/api/auth/register", post(handlers::register))
        .route("/api/auth/login", post(handlers::login))
        .route("/api/auth/logout", post(handlers::logout))
        .route("/api/auth/recover", post(handlers::recover))
        .merge(protected)
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
