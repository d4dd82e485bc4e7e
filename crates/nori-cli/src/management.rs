//! 管理用 HTTP エンドポイント
//!
//! `GET /tasks` で status snapshot（登録済みタスク名を含む）を返します。読み取り専用です。

use std::future::Future;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use nori_core::app::{StatusReporter, StatusSnapshot};
use tokio::net::TcpListener;
use tracing::info;

pub fn router(reporter: StatusReporter) -> Router {
    Router::new()
        .route("/tasks", get(list_tasks))
        .with_state(reporter)
}

async fn list_tasks(State(reporter): State<StatusReporter>) -> Json<StatusSnapshot> {
    Json(reporter.snapshot())
}

pub async fn serve(
    listener: TcpListener,
    reporter: StatusReporter,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "management endpoint listening");
    axum::serve(listener, router(reporter))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
