use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tower_sessions::Session;
use uuid::Uuid;

use crate::AppState;
use crate::auth::current_user;
use crate::categories::resolve_category;
use crate::constants::*;
use crate::database::{Db, now_ts};
use crate::extractor::ExtractError;
use crate::models::{
    CandidateExpense, CategoryTotal, CreateExpensePayload, DuplicateInfo, Expense, ExpenseDetail,
    ExpenseWithDuplicate, GetExpensesQuery, GetExpensesResponse, Source, Summary, User,
};
use crate::utils::{
    amount_to_storage, db_error, db_error_with_context, normalize_amount, validate_limit,
    validate_page,
};

/// Hex SHA-256 of the exact submitted bytes; the exact-duplicate signal for
/// binary-file channels.
pub fn compute_file_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

const EXPENSE_COLUMNS: &str =
    "id, user_id, amount, currency, description, category_id, date, source, raw_input, file_hash, created_at";

pub fn extract_expense_from_row(row: libsql::Row) -> anyhow::Result<Expense> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let amount_text: String = row.get(2)?;
    let amount = amount_text
        .parse::<Decimal>()
        .map_err(|e| anyhow::anyhow!("invalid stored amount {:?}: {}", amount_text, e))?;
    let currency: String = row.get(3)?;
    let description: String = row.get(4)?;
    let category_id: Option<String> = row.get(5)?;
    let date: i64 = row.get(6)?;
    let source_tag: String = row.get(7)?;
    let source = Source::from_tag(&source_tag)
        .ok_or_else(|| anyhow::anyhow!("unknown source tag: {}", source_tag))?;
    let raw_input: Option<String> = row.get(8)?;
    let file_hash: Option<String> = row.get(9)?;
    let created_at: i64 = row.get(10)?;

    Ok(Expense {
        id,
        user_id,
        amount,
        currency,
        description,
        category_id,
        date,
        source,
        raw_input,
        file_hash,
        created_at,
    })
}

fn extract_detail_from_row(row: libsql::Row) -> anyhow::Result<ExpenseDetail> {
    let category_name: Option<String> = row.get(11)?;
    let category_emoji: Option<String> = row.get(12)?;
    let expense = extract_expense_from_row(row)?;
    Ok(ExpenseDetail {
        expense,
        category_name,
        category_emoji,
    })
}

async fn query_one_expense(
    conn: &libsql::Connection,
    sql: &str,
    params: impl libsql::params::IntoParams,
) -> anyhow::Result<Option<Expense>> {
    let mut rows = conn.query(sql, params).await?;
    if let Some(row) = rows.next().await? {
        Ok(Some(extract_expense_from_row(row)?))
    } else {
        Ok(None)
    }
}

/// Strategy 1: verbatim re-submission of the same file bytes.
pub async fn find_duplicate_by_hash(
    conn: &libsql::Connection,
    file_hash: &str,
    user_id: &str,
) -> anyhow::Result<Option<Expense>> {
    let sql = format!(
        "SELECT {} FROM expenses WHERE user_id = ? AND file_hash = ? LIMIT 1",
        EXPENSE_COLUMNS
    );
    query_one_expense(conn, &sql, (user_id, file_hash)).await
}

/// Strategy 2: same amount and currency within ±1 day of the candidate's
/// date. Catches the same purchase arriving through two different channels.
/// The most recent match by date wins.
pub async fn find_duplicate_by_fingerprint(
    conn: &libsql::Connection,
    amount: &str,
    currency: &str,
    date: i64,
    user_id: &str,
) -> anyhow::Result<Option<Expense>> {
    let sql = format!(
        "SELECT {} FROM expenses
         WHERE user_id = ? AND amount = ? AND currency = ? AND date BETWEEN ? AND ?
         ORDER BY date DESC
         LIMIT 1",
        EXPENSE_COLUMNS
    );
    query_one_expense(
        conn,
        &sql,
        (
            user_id,
            amount,
            currency,
            date - DUPLICATE_WINDOW_SECONDS,
            date + DUPLICATE_WINDOW_SECONDS,
        ),
    )
    .await
}

/// Runs both duplicate strategies in strict order, short-circuiting on the
/// first hit. The hash signal is cheaper and more certain, so a hash match
/// skips the fingerprint query entirely.
pub async fn find_duplicate(
    conn: &libsql::Connection,
    amount: &str,
    currency: &str,
    date: i64,
    user_id: &str,
    file_hash: Option<&str>,
) -> anyhow::Result<Option<Expense>> {
    if let Some(hash) = file_hash {
        if let Some(expense) = find_duplicate_by_hash(conn, hash, user_id).await? {
            return Ok(Some(expense));
        }
    }
    find_duplicate_by_fingerprint(conn, amount, currency, date, user_id).await
}

/// Ingestion pipeline: duplicate screening, category resolution and the
/// expense write, all inside one transaction. The duplicate is advisory;
/// the write always proceeds so that coincidentally identical purchases stay
/// correctable by the owner instead of being silently dropped.
pub async fn save_expense(
    db: &Db,
    candidate: &CandidateExpense,
    user: &User,
    source: Source,
    raw_input: &str,
    file_hash: Option<&str>,
) -> anyhow::Result<(Expense, Option<Expense>)> {
    let amount = normalize_amount(candidate.amount);
    if amount <= Decimal::ZERO {
        anyhow::bail!("expense amount must be positive");
    }
    let amount_text = amount_to_storage(candidate.amount);
    let currency = candidate
        .currency
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(&user.currency)
        .to_string();
    let date = candidate.date.unwrap_or_else(now_ts);

    let conn = db.write().await;
    let tx = conn.transaction().await?;

    let duplicate = find_duplicate(&tx, &amount_text, &currency, date, &user.id, file_hash).await?;
    let category = resolve_category(&tx, &candidate.category_name, &user.id).await?;

    let expense = Expense {
        id: Uuid::new_v4().to_string(),
        user_id: user.id.clone(),
        amount,
        currency,
        description: candidate.description.clone(),
        category_id: Some(category.id),
        date,
        source,
        raw_input: Some(raw_input.to_string()),
        file_hash: file_hash.map(str::to_string),
        created_at: now_ts(),
    };

    tx.execute(
        "INSERT INTO expenses (id, user_id, amount, currency, description, category_id, date, source, raw_input, file_hash, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            expense.id.as_str(),
            expense.user_id.as_str(),
            amount_text.as_str(),
            expense.currency.as_str(),
            expense.description.as_str(),
            expense.category_id.as_deref(),
            expense.date,
            expense.source.as_str(),
            expense.raw_input.as_deref(),
            expense.file_hash.as_deref(),
            expense.created_at,
        ),
    )
    .await?;

    tx.commit().await?;

    Ok((expense, duplicate))
}

const DETAIL_COLUMNS: &str = "e.id, e.user_id, e.amount, e.currency, e.description, e.category_id, \
     e.date, e.source, e.raw_input, e.file_hash, e.created_at, c.name, c.emoji";

/// Reloads a stored expense together with its category's display fields.
pub async fn get_expense_detail(
    conn: &libsql::Connection,
    expense_id: &str,
) -> anyhow::Result<ExpenseDetail> {
    let sql = format!(
        "SELECT {} FROM expenses e LEFT JOIN categories c ON e.category_id = c.id WHERE e.id = ?",
        DETAIL_COLUMNS
    );
    let mut rows = conn.query(&sql, [expense_id]).await?;
    let row = rows
        .next()
        .await?
        .ok_or_else(|| anyhow::anyhow!("expense {} not found after insert", expense_id))?;
    extract_detail_from_row(row)
}

pub async fn last_expenses(
    conn: &libsql::Connection,
    user_id: &str,
    limit: u32,
) -> anyhow::Result<Vec<ExpenseDetail>> {
    let sql = format!(
        "SELECT {} FROM expenses e LEFT JOIN categories c ON e.category_id = c.id
         WHERE e.user_id = ?
         ORDER BY e.date DESC
         LIMIT ?",
        DETAIL_COLUMNS
    );
    let mut rows = conn.query(&sql, (user_id, limit)).await?;
    let mut expenses = Vec::new();
    while let Some(row) = rows.next().await? {
        expenses.push(extract_detail_from_row(row)?);
    }
    Ok(expenses)
}

async fn summary_for_period(
    conn: &libsql::Connection,
    user_id: &str,
    start: i64,
    end: i64,
) -> anyhow::Result<Summary> {
    let mut rows = conn
        .query(
            "SELECT COALESCE(SUM(CAST(amount AS REAL)), 0.0) FROM expenses
             WHERE user_id = ? AND date BETWEEN ? AND ?",
            (user_id, start, end),
        )
        .await?;
    let total: f64 = match rows.next().await? {
        Some(row) => row.get(0)?,
        None => 0.0,
    };

    let mut rows = conn
        .query(
            "SELECT COALESCE(c.name, 'Sin categoría'), COALESCE(c.emoji, '💰'),
                    SUM(CAST(e.amount AS REAL)) AS subtotal
             FROM expenses e LEFT JOIN categories c ON e.category_id = c.id
             WHERE e.user_id = ? AND e.date BETWEEN ? AND ?
             GROUP BY c.id
             ORDER BY subtotal DESC",
            (user_id, start, end),
        )
        .await?;
    let mut by_category = Vec::new();
    while let Some(row) = rows.next().await? {
        let name: String = row.get(0)?;
        let emoji: String = row.get(1)?;
        let total: f64 = row.get(2)?;
        by_category.push(CategoryTotal { name, emoji, total });
    }

    let recent = last_expenses(conn, user_id, LAST_EXPENSES_COUNT).await?;

    Ok(Summary {
        total,
        by_category,
        recent,
        start,
        end,
    })
}

/// Spending summary from the first day of the current month to now.
pub async fn monthly_summary(conn: &libsql::Connection, user_id: &str) -> anyhow::Result<Summary> {
    let now = OffsetDateTime::now_utc();
    let start = now
        .replace_day(1)
        .map_err(|e| anyhow::anyhow!("invalid month start: {}", e))?
        .replace_time(time::Time::MIDNIGHT);
    summary_for_period(conn, user_id, start.unix_timestamp(), now.unix_timestamp()).await
}

/// Spending summary over the trailing seven days.
pub async fn weekly_summary(conn: &libsql::Connection, user_id: &str) -> anyhow::Result<Summary> {
    let end = now_ts();
    let start = end - 7 * 24 * 60 * 60;
    summary_for_period(conn, user_id, start, end).await
}

pub fn extraction_error_response(error: ExtractError) -> (StatusCode, String) {
    match error {
        ExtractError::NoAmount => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "No pude identificar un gasto. Menciona el monto claramente.".to_string(),
        ),
        ExtractError::NotAReceipt => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "No pude leer el ticket. Asegúrate de que la imagen sea clara y muestre el monto total."
                .to_string(),
        ),
        ExtractError::TranscriptionFailed => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "No pude transcribir el audio. Intenta de nuevo.".to_string(),
        ),
        ExtractError::Backend(msg) => {
            log::error!("extraction backend failure: {}", msg);
            (
                StatusCode::BAD_GATEWAY,
                "El servicio de extracción no está disponible. Intenta más tarde.".to_string(),
            )
        }
    }
}

pub async fn create_expense(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<CreateExpensePayload>,
) -> Result<(StatusCode, Json<ExpenseWithDuplicate>), (StatusCode, String)> {
    let user = current_user(&state.db, &session).await?;

    let text = payload.text.trim();
    if text.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Expense text cannot be empty".to_string(),
        ));
    }

    let candidate = state
        .extractor
        .extract_from_text(text, now_ts())
        .await
        .map_err(extraction_error_response)?;

    let (expense, duplicate) =
        save_expense(&state.db, &candidate, &user, Source::Text, text, None)
            .await
            .map_err(|_| db_error_with_context("failed to save expense"))?;

    let conn = state.db.read().await;
    let detail = get_expense_detail(&conn, &expense.id)
        .await
        .map_err(|_| db_error())?;

    Ok((
        StatusCode::CREATED,
        Json(ExpenseWithDuplicate {
            expense: detail,
            possible_duplicate: duplicate.as_ref().map(DuplicateInfo::from_expense),
        }),
    ))
}

pub async fn get_expenses(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<GetExpensesQuery>,
) -> Result<(StatusCode, Json<GetExpensesResponse>), (StatusCode, String)> {
    let user = current_user(&state.db, &session).await?;

    let page = validate_page(query.page)?;
    let limit = validate_limit(query.limit, DEFAULT_EXPENSES_LIMIT)?;
    let offset = (page - 1) * limit;

    let mut filters = String::from("e.user_id = ?");
    let mut params: Vec<libsql::Value> = vec![user.id.clone().into()];
    if let Some(category_id) = &query.category_id {
        filters.push_str(" AND e.category_id = ?");
        params.push(category_id.clone().into());
    }
    if let Some(date_from) = query.date_from {
        filters.push_str(" AND e.date >= ?");
        params.push(date_from.into());
    }
    if let Some(date_to) = query.date_to {
        filters.push_str(" AND e.date <= ?");
        params.push(date_to.into());
    }

    let conn = state.db.read().await;

    let count_sql = format!("SELECT COUNT(*) FROM expenses e WHERE {}", filters);
    let mut count_rows = conn
        .query(&count_sql, libsql::params_from_iter(params.clone()))
        .await
        .map_err(|_| db_error_with_context("failed to count expenses"))?;
    let total: u32 = match count_rows.next().await.map_err(|_| db_error())? {
        Some(row) => row.get(0).map_err(|_| db_error())?,
        None => 0,
    };

    let items_sql = format!(
        "SELECT {} FROM expenses e LEFT JOIN categories c ON e.category_id = c.id
         WHERE {}
         ORDER BY e.date DESC
         LIMIT ? OFFSET ?",
        DETAIL_COLUMNS, filters
    );
    params.push((limit as i64).into());
    params.push((offset as i64).into());
    let mut rows = conn
        .query(&items_sql, libsql::params_from_iter(params))
        .await
        .map_err(|_| db_error_with_context("failed to query expenses"))?;

    let mut items = Vec::new();
    while let Some(row) = rows.next().await.map_err(|_| db_error())? {
        items.push(
            extract_detail_from_row(row).map_err(|_| db_error_with_context("invalid expense data"))?,
        );
    }

    Ok((
        StatusCode::OK,
        Json(GetExpensesResponse {
            items,
            total,
            page,
            limit,
        }),
    ))
}

pub async fn delete_expense(
    State(state): State<AppState>,
    session: Session,
    Path(expense_id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    let user = current_user(&state.db, &session).await?;

    let conn = state.db.write().await;
    let affected = conn
        .execute(
            "DELETE FROM expenses WHERE id = ? AND user_id = ?",
            (expense_id.as_str(), user.id.as_str()),
        )
        .await
        .map_err(|_| db_error_with_context("failed to delete expense"))?;

    if affected == 0 {
        return Err((StatusCode::NOT_FOUND, "Expense not found".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}
