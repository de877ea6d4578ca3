use anyhow::Result;
use libsql::{Builder, Connection};
use std::{path::Path, sync::Arc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::constants::GLOBAL_CATEGORIES;

const CREATE_USERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id             TEXT    PRIMARY KEY,
    email          TEXT    UNIQUE NOT NULL,
    password_hash  TEXT    NOT NULL,
    name           TEXT    NOT NULL,
    currency       TEXT    NOT NULL DEFAULT 'MXN',
    whatsapp_phone TEXT    UNIQUE,
    created_at     INTEGER NOT NULL
);
"#;

const CREATE_CATEGORIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS categories (
    id         TEXT    PRIMARY KEY,
    name       TEXT    NOT NULL,
    emoji      TEXT    NOT NULL,
    user_id    TEXT    REFERENCES users(id) ON DELETE CASCADE,
    created_at INTEGER NOT NULL
);
"#;

const CREATE_EXPENSES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS expenses (
    id          TEXT    PRIMARY KEY,
    user_id     TEXT    NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    amount      TEXT    NOT NULL,
    currency    TEXT    NOT NULL,
    description TEXT    NOT NULL,
    category_id TEXT    REFERENCES categories(id),
    date        INTEGER NOT NULL,
    source      TEXT    NOT NULL,
    raw_input   TEXT,
    file_hash   TEXT,
    created_at  INTEGER NOT NULL
);
"#;

const CREATE_LINK_TOKENS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS link_tokens (
    id         TEXT    PRIMARY KEY,
    user_id    TEXT    NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    token      TEXT    NOT NULL,
    expires_at INTEGER NOT NULL,
    used       INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);
"#;

pub type Db = Arc<RwLock<Connection>>;

pub fn now_ts() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Opens (or creates) the single application database, creates the schema and
/// seeds the global category catalog.
pub async fn init_db(data_dir: &str) -> Result<Db> {
    tokio::fs::create_dir_all(data_dir).await?;
    let path = Path::new(data_dir).join("gastobot.db");
    let db = Builder::new_local(path).build().await?;
    let conn = db.connect()?;

    conn.execute(CREATE_USERS_TABLE, ()).await?;
    conn.execute(CREATE_CATEGORIES_TABLE, ()).await?;
    conn.execute(CREATE_EXPENSES_TABLE, ()).await?;
    conn.execute(CREATE_LINK_TOKENS_TABLE, ()).await?;

    seed_global_categories(&conn).await?;

    Ok(Arc::new(RwLock::new(conn)))
}

/// Inserts any catalog category that does not already exist as a global row.
/// Runs on every startup; existing rows are left untouched.
async fn seed_global_categories(conn: &Connection) -> Result<()> {
    let mut rows = conn
        .query("SELECT name FROM categories WHERE user_id IS NULL", ())
        .await?;

    let mut existing = Vec::new();
    while let Some(row) = rows.next().await? {
        let name: String = row.get(0)?;
        existing.push(name);
    }

    let now = now_ts();
    for (name, emoji) in GLOBAL_CATEGORIES {
        if existing.iter().any(|n| n == name) {
            continue;
        }
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO categories (id, name, emoji, user_id, created_at) VALUES (?, ?, ?, NULL, ?)",
            (id.as_str(), *name, *emoji, now),
        )
        .await?;
    }

    Ok(())
}
