use axum::{Json, extract::State, http::StatusCode};
use tower_sessions::Session;

use crate::AppState;
use crate::auth::current_user;
use crate::expenses::{monthly_summary, weekly_summary};
use crate::models::Summary;
use crate::utils::db_error_with_context;

pub async fn monthly_stats(
    State(state): State<AppState>,
    session: Session,
) -> Result<(StatusCode, Json<Summary>), (StatusCode, String)> {
    let user = current_user(&state.db, &session).await?;

    let conn = state.db.read().await;
    let summary = monthly_summary(&conn, &user.id)
        .await
        .map_err(|_| db_error_with_context("failed to compute monthly summary"))?;

    Ok((StatusCode::OK, Json(summary)))
}

pub async fn weekly_stats(
    State(state): State<AppState>,
    session: Session,
) -> Result<(StatusCode, Json<Summary>), (StatusCode, String)> {
    let user = current_user(&state.db, &session).await?;

    let conn = state.db.read().await;
    let summary = weekly_summary(&conn, &user.id)
        .await
        .map_err(|_| db_error_with_context("failed to compute weekly summary"))?;

    Ok((StatusCode::OK, Json(summary)))
}
