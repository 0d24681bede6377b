//! Agent status endpoint.

use axum::{extract::State, routing::get, Json, Router};

use crate::state::{AppState, StatusSnapshot};

/// Creates the status routes.
///
/// # Routes
///
/// - `GET /status` - Counters describing reloads, reports, and health ticks
pub fn status_routes(state: AppState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .with_state(state)
}

/// Handler for GET /status.
async fn get_status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.status().snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentMode;
    use crate::state::AgentStatus;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_status_reports_mode_and_counters() {
        let state = AppState::new(Arc::new(AgentStatus::new(AgentMode::EventDriven)));
        let app = status_routes(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let status: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(status["mode"], "event_driven");
        assert_eq!(status["running"], false);
        assert_eq!(status["reloads_rejected"], 0);
        assert!(status["last_error"].is_null());
    }
}
