pub mod cel;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod services;

use sqlx::PgPool;

/// Shared state handed to the engines and background loops.
#[derive(Debug, Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: config::AppConfig,
}
