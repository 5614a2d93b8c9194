pub mod admin;
pub mod health;

use axum::Router;
use utoipa::OpenApi;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(admin::router())
        .merge(crate::realtime::server::router())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        admin::broadcast,
    ),
    components(
        schemas(
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::realtime::events::AdminNotice,
            health::HealthResponse,
            admin::BroadcastRequest,
            admin::BroadcastResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Admin", description = "Admin moderation"),
    )
)]
pub struct ApiDoc;
