use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode};
use tower_sessions::Session;
use uuid::Uuid;

use crate::AppState;
use crate::constants::*;
use crate::database::{Db, now_ts};
use crate::models::{LoginPayload, PublicUser, RegisterPayload, User};
use crate::utils::validate_string_length;

fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| anyhow::anyhow!("Failed to parse password hash: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

fn extract_user_from_row(row: libsql::Row) -> anyhow::Result<User> {
    let id: String = row.get(0)?;
    let email: String = row.get(1)?;
    let password_hash: String = row.get(2)?;
    let name: String = row.get(3)?;
    let currency: String = row.get(4)?;
    let whatsapp_phone: Option<String> = row.get(5)?;
    Ok(User {
        id,
        email,
        name,
        currency,
        whatsapp_phone,
        password_hash,
    })
}

const USER_COLUMNS: &str = "id, email, password_hash, name, currency, whatsapp_phone";

/// Creates an account. Shared by the HTTP register handler and the chat
/// channel's self-registration path.
pub async fn create_user(
    db: &Db,
    email: &str,
    password: &str,
    name: &str,
    currency: &str,
) -> anyhow::Result<User> {
    let password_hash = hash_password(password)?;
    let id = Uuid::new_v4().to_string();
    let conn = db.write().await;

    conn.execute(
        "INSERT INTO users (id, email, password_hash, name, currency, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        (
            id.as_str(),
            email,
            password_hash.as_str(),
            name,
            currency,
            now_ts(),
        ),
    )
    .await?;

    Ok(User {
        id,
        email: email.to_string(),
        name: name.to_string(),
        currency: currency.to_string(),
        whatsapp_phone: None,
        password_hash,
    })
}

async fn get_user_by(db: &Db, column: &str, value: &str) -> anyhow::Result<Option<User>> {
    let conn = db.read().await;
    let sql = format!("SELECT {} FROM users WHERE {} = ?", USER_COLUMNS, column);
    let mut rows = conn.query(&sql, [value]).await?;

    if let Some(row) = rows.next().await? {
        Ok(Some(extract_user_from_row(row)?))
    } else {
        Ok(None)
    }
}

pub async fn get_user_by_email(db: &Db, email: &str) -> anyhow::Result<Option<User>> {
    get_user_by(db, "email", email).await
}

pub async fn get_user_by_id(db: &Db, id: &str) -> anyhow::Result<Option<User>> {
    get_user_by(db, "id", id).await
}

/// Looks up the account bound to a chat identity, if any.
pub async fn get_user_by_phone(db: &Db, phone: &str) -> anyhow::Result<Option<User>> {
    get_user_by(db, "whatsapp_phone", phone).await
}

fn public(user: &User) -> PublicUser {
    PublicUser {
        id: user.id.clone(),
        email: user.email.clone(),
        name: user.name.clone(),
        currency: user.currency.clone(),
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> Result<(StatusCode, Json<PublicUser>), (StatusCode, String)> {
    // Input validation
    if !payload.email.contains('@') || payload.email.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "A valid email address is required".to_string(),
        ));
    }
    if payload.password.len() < MIN_PASSWORD_LENGTH {
        return Err((
            StatusCode::BAD_REQUEST,
            format!(
                "Password must be at least {} characters long",
                MIN_PASSWORD_LENGTH
            ),
        ));
    }
    validate_string_length(&payload.name, "Name", MAX_NAME_LENGTH)?;

    let user = create_user(
        &state.db,
        payload.email.trim(),
        &payload.password,
        payload.name.trim(),
        &state.config.default_currency,
    )
    .await
    .map_err(|e| {
        if e.to_string().contains("UNIQUE constraint failed") {
            (StatusCode::CONFLICT, "Email already registered".to_string())
        } else {
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    })?;

    Ok((StatusCode::CREATED, Json(public(&user))))
}

pub async fn login(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<LoginPayload>,
) -> Result<(StatusCode, Json<PublicUser>), (StatusCode, String)> {
    if payload.email.trim().is_empty() || payload.password.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Email and password are required".to_string(),
        ));
    }

    let user_data = get_user_by_email(&state.db, payload.email.trim())
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let user = match user_data {
        Some(data) => data,
        None => return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".to_string())),
    };

    let is_valid = verify_password(&payload.password, &user.password_hash)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    if !is_valid {
        return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".to_string()));
    }

    session
        .insert("user_id", &user.id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok((StatusCode::OK, Json(public(&user))))
}

/// Loads the account behind the current session. Handlers need the full row
/// (default currency, linked phone), not just the id.
pub async fn current_user(db: &Db, session: &Session) -> Result<User, (StatusCode, String)> {
    let user_id: Option<String> = session
        .get("user_id")
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let Some(user_id) = user_id else {
        return Err((StatusCode::UNAUTHORIZED, ERR_UNAUTHORIZED.to_string()));
    };

    get_user_by_id(db, &user_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or((StatusCode::UNAUTHORIZED, ERR_UNAUTHORIZED.to_string()))
}

pub async fn me(
    State(state): State<AppState>,
    session: Session,
) -> Result<(StatusCode, Json<PublicUser>), (StatusCode, String)> {
    let user = current_user(&state.db, &session).await?;
    Ok((StatusCode::OK, Json(public(&user))))
}

pub async fn logout(session: Session) -> Result<StatusCode, (StatusCode, String)> {
    session.clear().await;

    Ok(StatusCode::NO_CONTENT)
}
