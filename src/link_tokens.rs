use axum::{Json, extract::State, http::StatusCode};
use rand::Rng;
use tower_sessions::Session;
use uuid::Uuid;

use crate::AppState;
use crate::auth::{current_user, get_user_by_id};
use crate::constants::{LINK_TOKEN_TTL_MINUTES, LINK_TOKEN_DIGITS};
use crate::database::{Db, now_ts};
use crate::models::{LinkPinResponse, User};
use crate::utils::db_error_with_context;

/// True when a message body looks like a linking PIN.
pub fn is_pin(body: &str) -> bool {
    body.len() == LINK_TOKEN_DIGITS && body.chars().all(|c| c.is_ascii_digit())
}

/// Issues a fresh six-digit linking code for an account. All prior unused
/// tokens of the account are invalidated in the same transaction, so only
/// the newest code can ever be redeemed. A collision with another account's
/// live code is tolerated: redemption scopes by code + unused + unexpired,
/// and the set of simultaneously valid codes is tiny against the code space.
pub async fn issue_token(db: &Db, user_id: &str) -> anyhow::Result<(String, i64)> {
    let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32));
    let expires_at = now_ts() + LINK_TOKEN_TTL_MINUTES * 60;

    let conn = db.write().await;
    let tx = conn.transaction().await?;

    tx.execute(
        "UPDATE link_tokens SET used = 1 WHERE user_id = ? AND used = 0",
        [user_id],
    )
    .await?;

    tx.execute(
        "INSERT INTO link_tokens (id, user_id, token, expires_at, used, created_at)
         VALUES (?, ?, ?, ?, 0, ?)",
        (
            Uuid::new_v4().to_string().as_str(),
            user_id,
            code.as_str(),
            expires_at,
            now_ts(),
        ),
    )
    .await?;

    tx.commit().await?;
    Ok((code, expires_at))
}

/// Redeems a PIN sent from an unlinked chat identity. On a match the token is
/// consumed and the phone is bound to the token's account, atomically.
/// Returns the linked account, or None when no unused, unexpired token
/// carries that code.
pub async fn redeem_token(db: &Db, code: &str, phone: &str) -> anyhow::Result<Option<User>> {
    let user_id = {
        let conn = db.write().await;
        let tx = conn.transaction().await?;

        let mut rows = tx
            .query(
                "SELECT id, user_id FROM link_tokens
                 WHERE token = ? AND used = 0 AND expires_at > ?
                 LIMIT 1",
                (code, now_ts()),
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let token_id: String = row.get(0)?;
        let user_id: String = row.get(1)?;
        drop(rows);

        tx.execute(
            "UPDATE link_tokens SET used = 1 WHERE id = ?",
            [token_id.as_str()],
        )
        .await?;
        tx.execute(
            "UPDATE users SET whatsapp_phone = ? WHERE id = ?",
            (phone, user_id.as_str()),
        )
        .await?;

        tx.commit().await?;
        user_id
    };

    get_user_by_id(db, &user_id).await
}

pub async fn create_link_pin(
    State(state): State<AppState>,
    session: Session,
) -> Result<(StatusCode, Json<LinkPinResponse>), (StatusCode, String)> {
    let user = current_user(&state.db, &session).await?;

    let (pin, _expires_at) = issue_token(&state.db, &user.id)
        .await
        .map_err(|_| db_error_with_context("failed to issue link token"))?;

    Ok((
        StatusCode::OK,
        Json(LinkPinResponse {
            pin,
            expires_in_minutes: LINK_TOKEN_TTL_MINUTES,
        }),
    ))
}
