//! Admin moderation endpoints that raise realtime events.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::middleware::AuthUser;
use crate::error::{ApiError, ApiErrorBody};
use crate::realtime::events::AdminNotice;
use crate::realtime::router::{BroadcastTarget, DomainEvent};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/admin/broadcast", post(broadcast))
}

// ---------------------------------------------------------------------------
// POST /api/admin/broadcast
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequest {
    pub message: Option<String>,
    /// Severity shown by clients ("info", "warning", ...).
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    /// "all" (default), "specific" or "admins".
    #[serde(default = "default_target")]
    pub target_users: String,
    #[serde(default)]
    pub user_ids: Vec<i64>,
}

fn default_kind() -> String {
    "info".to_string()
}

fn default_target() -> String {
    "all".to_string()
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastResponse {
    pub message: String,
    pub target_count: usize,
    pub notification: AdminNotice,
}

#[utoipa::path(
    post,
    path = "/api/admin/broadcast",
    tag = "Admin",
    request_body = BroadcastRequest,
    responses(
        (status = 200, description = "Notification dispatched", body = BroadcastResponse),
        (status = 400, description = "Missing message or unknown target", body = ApiErrorBody),
        (status = 401, description = "Not authenticated", body = ApiErrorBody),
        (status = 403, description = "Not an admin", body = ApiErrorBody),
    ),
)]
pub async fn broadcast(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Json(body): Json<BroadcastRequest>,
) -> Result<Json<BroadcastResponse>, ApiError> {
    if !user.is_admin {
        return Err(ApiError::forbidden("Admin access required"));
    }

    let message = body
        .message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ApiError::bad_request("Message is required"))?;

    let target = match body.target_users.as_str() {
        "all" => BroadcastTarget::All,
        "specific" => BroadcastTarget::Users(body.user_ids.clone()),
        "admins" => BroadcastTarget::Admins,
        other => {
            return Err(ApiError::bad_request(format!(
                "Unknown broadcast target: {other}"
            )))
        }
    };

    let notice = AdminNotice {
        kind: "admin_broadcast".to_string(),
        sub_type: body.kind.clone(),
        message: message.to_string(),
        from: format!("Admin: {} {}", user.first_name, user.last_name),
        timestamp: Utc::now(),
    };

    let target_count = state
        .events
        .dispatch(DomainEvent::AdminNotification {
            target,
            notice: notice.clone(),
        })
        .await?;

    tracing::info!(
        admin = %user.username,
        target = %body.target_users,
        target_count,
        "admin broadcast dispatched"
    );

    Ok(Json(BroadcastResponse {
        message: "Notification sent successfully".to_string(),
        target_count,
        notification: notice,
    }))
}
