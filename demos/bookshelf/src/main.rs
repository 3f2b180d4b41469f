mod models;
mod repository;
mod routes;
mod service;

use std::sync::Arc;
use std::time::Duration;

use ambit_core::{default_trace, init_tracing, AmbitConfig, HealthBuilder};
use ambit_data_sqlx::{ConnectionPool, PoolConfig, PoolHealth, SqlxErrorExt, TxManager};
use axum::Router;
use sqlx::Postgres;

use crate::routes::AppState;
use crate::service::LibraryService;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS books (
        id BIGSERIAL PRIMARY KEY,
        title TEXT NOT NULL,
        author TEXT NOT NULL,
        copies INTEGER NOT NULL DEFAULT 1 CHECK (copies >= 0)
    )",
    "CREATE TABLE IF NOT EXISTS book_audit (
        id BIGSERIAL PRIMARY KEY,
        book_id BIGINT NOT NULL,
        action TEXT NOT NULL
    )",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = AmbitConfig::load("dev")?;
    let port: u16 = config.get_or("app.port", 3000)?;
    let request_timeout: Duration = config.get_or("app.request.timeout", Duration::from_secs(10))?;

    let config = config.with_typed::<PoolConfig>()?;
    let pool = ConnectionPool::<Postgres>::open(&config).await?;
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool.inner())
            .await
            .map_err(|e| e.into_data_error())?;
    }

    let tx = TxManager::new(pool.clone());
    let state = AppState {
        library: Arc::new(LibraryService::new(tx.clone())),
        request_timeout,
    };

    let health: Router = HealthBuilder::new()
        .check(PoolHealth::new(pool))
        .cache_ttl(Duration::from_secs(2))
        .build();
    let app = routes::router(state).merge(health).layer(default_trace());

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "bookshelf listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    tx.close().await;
    Ok(())
}
