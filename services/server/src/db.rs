use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Opens the shared pool with the configured connection cap.
/// Startup fails fast on an unreachable database.
pub async fn create_pool(database_url: &str, max_connections: u32) -> PgPool {
    PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect(database_url)
        .await
        .expect("database connection failed")
}

/// Applies pending migrations from `services/server/migrations`.
pub async fn run_migrations(pool: &PgPool) {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .expect("database migration failed")
}
