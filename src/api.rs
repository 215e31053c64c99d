use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};
use tokio::task;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::db;

const MAX_LIMIT: u32 = 500;

#[derive(Deserialize)]
pub struct TransactionsQuery {
    pub to: Option<String>,
    pub limit: Option<u32>, // defaults to 10
}

type Db = Arc<Mutex<Connection>>;

pub fn router(conn: Db) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "chain-sentry storage API running" }))
        .route("/transactions", get(list_transactions))
        .route("/transactions/:hash", get(get_transaction))
        .layer(cors)
        .with_state(conn)
}

pub async fn serve(port: u16, conn: Db, shutdown: CancellationToken) -> eyre::Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(conn).into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

// ---------- DB wrappers (spawn_blocking) ----------

async fn with_db<T, F>(conn: Db, f: F) -> Result<T, Response>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
{
    let joined = task::spawn_blocking(move || {
        let guard = conn.lock().map_err(|_| "connection mutex poisoned".to_string())?;
        f(&guard).map_err(|e| e.to_string())
    })
    .await;

    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            error!("API query failed: {}", e);
            Err(internal_error())
        }
        Err(e) => {
            error!("API query task failed: {:?}", e);
            Err(internal_error())
        }
    }
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "storage unavailable"})),
    )
        .into_response()
}

async fn get_transaction(State(conn): State<Db>, Path(hash): Path<String>) -> Response {
    match with_db(conn, move |c| db::get_transaction(c, &hash)).await {
        Ok(Some(tx)) => Json(tx).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({"error": "not found"}))).into_response(),
        Err(resp) => resp,
    }
}

async fn list_transactions(State(conn): State<Db>, Query(q): Query<TransactionsQuery>) -> Response {
    let limit = q.limit.unwrap_or(10).min(MAX_LIMIT);
    let to = q.to;
    match with_db(conn, move |c| db::recent_transactions(c, to.as_deref(), limit)).await {
        Ok(rows) => Json(rows).into_response(),
        Err(resp) => resp,
    }
}
