use chrono::Utc;
use server::config::QuizConfig;
use server::state::AppState;
use server::{db, repo, spawn_engine};
use std::env;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned());
    let config = QuizConfig::from_env();

    info!("connecting to database...");
    let pool = db::create_pool(&database_url, config.db_max_connections).await;
    db::run_migrations(&pool).await;
    info!("migrations applied");

    // A quiz interrupted mid-run by an unclean shutdown cannot resume.
    match repo::quizzes::cancel_stale_in_progress(&pool).await {
        Ok(0) => {}
        Ok(n) => warn!(count = n, "cancelled stale in-progress quizzes from a previous run"),
        Err(err) => error!(error = %err, "failed to clean up stale quiz state"),
    }

    let state = AppState::new(pool, config);
    let engine = spawn_engine(&state);

    // Re-install timelines for quizzes scheduled before the restart.
    match repo::quizzes::get_scheduled(&state.pool).await {
        Ok(quizzes) => {
            for quiz in quizzes {
                if quiz.scheduled_time <= Utc::now() {
                    warn!(quiz_id = quiz.quiz_id, "scheduled start already passed; skipping");
                    continue;
                }
                match state.scheduler.schedule(quiz.quiz_id, quiz.scheduled_time).await {
                    Ok(()) => info!(quiz_id = quiz.quiz_id, "timeline restored"),
                    Err(err) => {
                        warn!(quiz_id = quiz.quiz_id, error = %err, "could not restore timeline");
                    }
                }
            }
        }
        Err(err) => error!(error = %err, "failed to load scheduled quizzes"),
    }

    let router = server::build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind");
    info!(addr = %bind_addr, "server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = engine.shutdown.send(true);
    info!("server shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
