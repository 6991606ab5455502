pub mod answers;
pub mod auth;
pub mod cache;
pub mod cluster;
pub mod config;
pub mod db;
pub mod events;
pub mod finalize;
pub mod http;
pub mod hub;
pub mod repo;
pub mod runner;
pub mod scheduler;
pub mod state;
pub mod ws;

pub use state::AppState;

use axum::{
    routing::{get, post},
    Router,
};
use runner::RunnerDeps;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/api/v1/quizzes/active", get(http::quizzes::get_active_quiz))
        .route(
            "/api/v1/quizzes/:quiz_id/results",
            get(http::quizzes::get_quiz_results),
        )
        .route(
            "/api/v1/quizzes/:quiz_id/schedule",
            post(http::quizzes::schedule_quiz),
        )
        .route(
            "/api/v1/quizzes/:quiz_id/cancel",
            post(http::quizzes::cancel_quiz),
        )
        .route("/api/v1/tickets", post(http::tickets::create_ticket))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Background tasks of the quiz engine plus their shutdown handle.
pub struct EngineHandle {
    pub shutdown: watch::Sender<bool>,
    pub tasks: Vec<JoinHandle<()>>,
}

/// Spawns the runner loop and, when enabled, the cluster relay tasks.
/// Call once after constructing the state.
pub fn spawn_engine(state: &AppState) -> EngineHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    if let Some(start_rx) = state.take_start_rx() {
        let deps = RunnerDeps {
            pool: state.pool.clone(),
            cache: Arc::clone(&state.cache),
            events: Arc::clone(&state.events),
            config: Arc::clone(&state.config),
            active: state.active.clone(),
        };
        tasks.push(runner::spawn_runner_loop(deps, start_rx, shutdown_rx));
    }

    if state.config.cluster_enabled {
        tasks.extend(cluster::spawn_subscribers(
            Arc::clone(&state.hub),
            &state.pubsub,
            state.instance_id.clone(),
        ));
        tasks.push(cluster::spawn_metrics_publisher(
            Arc::clone(&state.hub),
            Arc::clone(&state.pubsub),
            state.instance_id.clone(),
            state.config.metrics_interval,
        ));
    }

    EngineHandle {
        shutdown: shutdown_tx,
        tasks,
    }
}

mod health {
    use axum::response::IntoResponse;
    pub async fn healthz() -> impl IntoResponse {
        "ok"
    }
    pub async fn readyz() -> impl IntoResponse {
        "ok"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuizConfig;
    use crate::state::tests::make_lazy_pool;

    #[tokio::test]
    async fn router_builds_and_engine_spawns_once() {
        let state = AppState::new(make_lazy_pool(), QuizConfig::default());
        let _router = build_router(state.clone());

        let engine = spawn_engine(&state);
        assert_eq!(engine.tasks.len(), 1, "runner loop only when cluster is off");

        let second = spawn_engine(&state);
        assert!(second.tasks.is_empty(), "start channel is consumed once");

        let _ = engine.shutdown.send(true);
    }

    #[tokio::test]
    async fn cluster_mode_spawns_the_relay_tasks() {
        let config = QuizConfig {
            cluster_enabled: true,
            ..QuizConfig::default()
        };
        let state = AppState::new(make_lazy_pool(), config);
        let engine = spawn_engine(&state);
        // Runner loop + two subscribers + metrics publisher.
        assert_eq!(engine.tasks.len(), 4);
        let _ = engine.shutdown.send(true);
        for task in engine.tasks {
            task.abort();
        }
    }
}
