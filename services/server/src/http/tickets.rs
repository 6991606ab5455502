use crate::auth;
use crate::http::response::{bad_request, internal_error};
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct CreateTicketRequest {
    pub user_id: i64,
}

/// Auth hand-off point: mints a single-use WebSocket ticket for an
/// already-authenticated user. The raw value appears only in this
/// response.
pub async fn create_ticket(
    State(state): State<AppState>,
    Json(body): Json<CreateTicketRequest>,
) -> impl IntoResponse {
    if body.user_id <= 0 {
        return bad_request("user_id must be positive");
    }
    match auth::issue_ticket(&state.pool, body.user_id, state.config.ticket_ttl).await {
        Ok(ticket) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "ticket": ticket,
                "expires_in_seconds": state.config.ticket_ttl.as_secs(),
            })),
        )
            .into_response(),
        Err(err) => internal_error(err),
    }
}
