use axum::{
    Json,
    extract::{Multipart, State},
    http::StatusCode,
};
use tower_sessions::Session;

use crate::AppState;
use crate::auth::current_user;
use crate::constants::MAX_FILE_SIZE;
use crate::database::now_ts;
use crate::expenses::{
    compute_file_hash, extraction_error_response, get_expense_detail, save_expense,
};
use crate::models::{DocumentImportResult, DuplicateInfo, ExpenseWithDuplicate, Source};
use crate::utils::{db_error, db_error_with_context};

struct Upload {
    bytes: Vec<u8>,
    content_type: String,
    file_name: String,
}

/// Pulls the "file" part out of a multipart upload and enforces the size cap.
/// Validation happens before any extraction call is attempted.
async fn read_upload(mut multipart: Multipart) -> Result<Upload, (StatusCode, String)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid upload: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let content_type = field.content_type().unwrap_or_default().to_string();
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid upload: {}", e)))?;

        if bytes.len() > MAX_FILE_SIZE {
            return Err((
                StatusCode::PAYLOAD_TOO_LARGE,
                "File too large (20 MB maximum)".to_string(),
            ));
        }

        return Ok(Upload {
            bytes: bytes.to_vec(),
            content_type,
            file_name,
        });
    }

    Err((
        StatusCode::BAD_REQUEST,
        "Missing 'file' form field".to_string(),
    ))
}

async fn reload_with_duplicate(
    state: &AppState,
    expense_id: &str,
    duplicate: Option<&crate::models::Expense>,
) -> Result<ExpenseWithDuplicate, (StatusCode, String)> {
    let conn = state.db.read().await;
    let detail = get_expense_detail(&conn, expense_id)
        .await
        .map_err(|_| db_error())?;
    Ok(ExpenseWithDuplicate {
        expense: detail,
        possible_duplicate: duplicate.map(DuplicateInfo::from_expense),
    })
}

pub async fn upload_image(
    State(state): State<AppState>,
    session: Session,
    multipart: Multipart,
) -> Result<(StatusCode, Json<ExpenseWithDuplicate>), (StatusCode, String)> {
    let user = current_user(&state.db, &session).await?;
    let upload = read_upload(multipart).await?;

    if !upload.content_type.starts_with("image/") {
        return Err((
            StatusCode::BAD_REQUEST,
            "The file must be an image (JPEG, PNG, ...)".to_string(),
        ));
    }

    let candidate = state
        .extractor
        .extract_from_image(&upload.bytes, &upload.content_type, None, now_ts())
        .await
        .map_err(extraction_error_response)?;

    let file_hash = compute_file_hash(&upload.bytes);
    let raw_input = if upload.file_name.is_empty() {
        "imagen".to_string()
    } else {
        upload.file_name.clone()
    };
    let (expense, duplicate) = save_expense(
        &state.db,
        &candidate,
        &user,
        Source::Image,
        &raw_input,
        Some(&file_hash),
    )
    .await
    .map_err(|_| db_error_with_context("failed to save expense"))?;

    let response = reload_with_duplicate(&state, &expense.id, duplicate.as_ref()).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn upload_audio(
    State(state): State<AppState>,
    session: Session,
    multipart: Multipart,
) -> Result<(StatusCode, Json<ExpenseWithDuplicate>), (StatusCode, String)> {
    let user = current_user(&state.db, &session).await?;
    let upload = read_upload(multipart).await?;

    let content_type = if upload.content_type.is_empty() {
        "audio/webm".to_string()
    } else {
        upload.content_type.clone()
    };

    let transcription = state
        .extractor
        .transcribe(&upload.bytes, &content_type)
        .await
        .map_err(extraction_error_response)?;

    let candidate = state
        .extractor
        .extract_from_text(&transcription, now_ts())
        .await
        .map_err(|e| {
            let (status, _) = extraction_error_response(e);
            (
                status,
                format!(
                    "Transcribí: '{}' pero no encontré un gasto. Menciona el monto claramente.",
                    transcription
                ),
            )
        })?;

    // No content hash on the audio path; only the fingerprint strategy
    // applies for dedup.
    let (expense, duplicate) = save_expense(
        &state.db,
        &candidate,
        &user,
        Source::Audio,
        &transcription,
        None,
    )
    .await
    .map_err(|_| db_error_with_context("failed to save expense"))?;

    let response = reload_with_duplicate(&state, &expense.id, duplicate.as_ref()).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn upload_pdf(
    State(state): State<AppState>,
    session: Session,
    multipart: Multipart,
) -> Result<(StatusCode, Json<DocumentImportResult>), (StatusCode, String)> {
    let user = current_user(&state.db, &session).await?;
    let upload = read_upload(multipart).await?;

    if upload.content_type != "application/pdf" {
        return Err((StatusCode::BAD_REQUEST, "The file must be a PDF".to_string()));
    }

    let candidates = state
        .extractor
        .extract_bank_statement(&upload.bytes, now_ts())
        .await
        .map_err(extraction_error_response)?;

    if candidates.is_empty() {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            "No encontré transacciones en el PDF. ¿Es un estado de cuenta bancario?".to_string(),
        ));
    }

    let raw_input = if upload.file_name.is_empty() {
        "pdf".to_string()
    } else {
        upload.file_name.clone()
    };

    let mut expenses = Vec::with_capacity(candidates.len());
    let mut duplicates_count = 0;
    for candidate in &candidates {
        let (expense, duplicate) =
            save_expense(&state.db, candidate, &user, Source::Pdf, &raw_input, None)
                .await
                .map_err(|_| db_error_with_context("failed to save expense"))?;
        if duplicate.is_some() {
            duplicates_count += 1;
        }
        expenses.push(reload_with_duplicate(&state, &expense.id, duplicate.as_ref()).await?);
    }

    Ok((
        StatusCode::OK,
        Json(DocumentImportResult {
            created: expenses.len(),
            duplicates_count,
            expenses,
        }),
    ))
}
