use axum::{Json, extract::State, http::StatusCode};
use tower_sessions::Session;
use uuid::Uuid;

use crate::AppState;
use crate::auth::current_user;
use crate::constants::DEFAULT_CATEGORY_EMOJI;
use crate::database::now_ts;
use crate::models::Category;
use crate::utils::db_error_with_context;

pub fn extract_category_from_row(row: libsql::Row) -> anyhow::Result<Category> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let emoji: String = row.get(2)?;
    let user_id: Option<String> = row.get(3)?;
    Ok(Category {
        id,
        name,
        emoji,
        user_id,
    })
}

/// Resolves a category name for an account. An account-owned row wins over a
/// global row of the same name; when neither exists a new account-owned row
/// is created with the default glyph. Always succeeds aside from storage
/// errors, and any row it creates lives in the caller's transaction.
pub async fn resolve_category(
    conn: &libsql::Connection,
    name: &str,
    user_id: &str,
) -> anyhow::Result<Category> {
    // `user_id IS NULL` sorts account-owned rows (0) before global rows (1).
    let mut rows = conn
        .query(
            "SELECT id, name, emoji, user_id FROM categories
             WHERE name = ? AND (user_id IS NULL OR user_id = ?)
             ORDER BY user_id IS NULL
             LIMIT 1",
            (name, user_id),
        )
        .await?;

    if let Some(row) = rows.next().await? {
        return extract_category_from_row(row);
    }

    let category = Category {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        emoji: DEFAULT_CATEGORY_EMOJI.to_string(),
        user_id: Some(user_id.to_string()),
    };
    conn.execute(
        "INSERT INTO categories (id, name, emoji, user_id, created_at) VALUES (?, ?, ?, ?, ?)",
        (
            category.id.as_str(),
            category.name.as_str(),
            category.emoji.as_str(),
            user_id,
            now_ts(),
        ),
    )
    .await?;

    Ok(category)
}

pub async fn get_categories(
    State(state): State<AppState>,
    session: Session,
) -> Result<(StatusCode, Json<Vec<Category>>), (StatusCode, String)> {
    let user = current_user(&state.db, &session).await?;

    let conn = state.db.read().await;
    let mut rows = conn
        .query(
            "SELECT id, name, emoji, user_id FROM categories
             WHERE user_id IS NULL OR user_id = ?
             ORDER BY name ASC",
            [user.id.as_str()],
        )
        .await
        .map_err(|_| db_error_with_context("failed to query categories"))?;

    let mut categories = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|_| db_error_with_context("failed to read category row"))?
    {
        categories.push(
            extract_category_from_row(row)
                .map_err(|_| db_error_with_context("invalid category data"))?,
        );
    }

    Ok((StatusCode::OK, Json(categories)))
}
