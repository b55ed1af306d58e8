use std::sync::Arc;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{config::Targets, services::SyncService};

pub mod content;
pub mod health;
pub mod response;
pub mod upload;

#[derive(Clone)]
pub struct AppState {
    pub sync_service: Arc<SyncService>,
    pub targets: Arc<Targets>,
}

pub fn http_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health::health))
        .route("/update-members-ts", post(content::update_members_ts))
        .route("/update-schedules-ts", post(content::update_schedules_ts))
        .route("/update-members", post(content::update_members))
        .route("/upload-image", post(upload::upload_image))
        .route("/upload-profile", post(upload::upload_profile))
        .route("/upload-member-image", post(upload::upload_member_image))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(Extension(state)),
        )
}
