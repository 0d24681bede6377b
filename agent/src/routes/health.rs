//! Liveness endpoint.
//!
//! Answers as long as the process is up. The body says whether a resource set
//! is installed, which is what an orchestrator needs to tell a starting agent
//! from one that has stopped relaying.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::config::AgentMode;
use crate::state::AppState;

/// Liveness response.
#[derive(Debug, Serialize)]
pub struct Liveness {
    /// `relaying` while the agent loop runs, `idle` otherwise.
    pub status: &'static str,
    /// Loop shape.
    pub mode: AgentMode,
    /// Generation of the installed resource set.
    pub generation: u64,
}

/// Creates the liveness route.
pub fn health_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(liveness))
        .with_state(state)
}

async fn liveness(State(state): State<AppState>) -> Json<Liveness> {
    let snapshot = state.status().snapshot();
    Json(Liveness {
        status: if snapshot.running { "relaying" } else { "idle" },
        mode: snapshot.mode,
        generation: snapshot.generation,
    })
}
