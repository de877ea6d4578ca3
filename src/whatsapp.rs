use axum::{
    Form, Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::BTreeMap;

use crate::AppState;
use crate::auth::{create_user, get_user_by_email, get_user_by_phone};
use crate::constants::DEFAULT_CURRENCY;
use crate::database::now_ts;
use crate::expenses::{
    compute_file_hash, get_expense_detail, last_expenses, monthly_summary, save_expense,
    weekly_summary,
};
use crate::extractor::ExtractError;
use crate::formatters::*;
use crate::link_tokens::{is_pin, redeem_token};
use crate::messaging::verify_signature;
use crate::models::{Source, User};

/// Recognized reporting commands, including synonyms. Free text that matches
/// none of these is treated as a natural-language expense description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    MonthlySummary,
    WeeklySummary,
    LastExpenses,
    Help,
}

const COMMAND_TABLE: &[(&str, Command)] = &[
    ("resumen", Command::MonthlySummary),
    ("semana", Command::WeeklySummary),
    ("últimos", Command::LastExpenses),
    ("ultimos", Command::LastExpenses),
    ("ayuda", Command::Help),
    ("help", Command::Help),
];

const REGISTRATION_KEYWORD: &str = "registro";

impl Command {
    pub fn parse(body: &str) -> Option<Command> {
        let normalized = body.trim().to_lowercase();
        COMMAND_TABLE
            .iter()
            .find(|(keyword, _)| *keyword == normalized)
            .map(|(_, command)| *command)
    }
}

/// Splits off the first whitespace-delimited field, collapsing the run of
/// whitespace that follows it.
fn split_field(input: &str) -> (&str, &str) {
    match input.find(char::is_whitespace) {
        Some(idx) => (&input[..idx], input[idx..].trim_start()),
        None => (input, ""),
    }
}

#[derive(Debug, Clone)]
pub struct MediaPayload {
    pub url: String,
    pub content_type: String,
}

/// Dispatches one inbound chat message and produces the reply body. Every
/// message is handled statelessly against the store: the sender is either
/// UNLINKED (no account bound to the phone) or LINKED.
pub async fn handle_incoming(
    state: &AppState,
    phone: &str,
    body: &str,
    media: Option<&MediaPayload>,
) -> String {
    let user = match get_user_by_phone(&state.db, phone).await {
        Ok(user) => user,
        Err(e) => {
            log::error!("failed to look up chat identity {}: {}", phone, e);
            return format_generic_error();
        }
    };

    match user {
        None => handle_unlinked(state, phone, body).await.unwrap_or_else(|e| {
            log::error!("error handling unlinked message from {}: {}", phone, e);
            format_generic_error()
        }),
        // A reply is owed no matter what goes wrong: there is no retry on an
        // inbound webhook delivery.
        Some(user) => match handle_linked(state, &user, body, media).await {
            Ok(reply) => reply,
            Err(e) => {
                log::error!("error processing message from {}: {}", phone, e);
                format_generic_error()
            }
        },
    }
}

async fn handle_unlinked(state: &AppState, phone: &str, body: &str) -> anyhow::Result<String> {
    // Option A: the body is a six-digit linking PIN.
    if is_pin(body) {
        return Ok(match redeem_token(&state.db, body, phone).await? {
            Some(user) => format_link_ok(&user.name),
            None => format_pin_expired(),
        });
    }

    // Option B: direct self-registration, "registro email pass nombre".
    // Credentials travel in chat; the confirmation carries a warning.
    let lower = body.to_lowercase();
    if lower.starts_with(REGISTRATION_KEYWORD)
        && lower[REGISTRATION_KEYWORD.len()..].starts_with(char::is_whitespace)
    {
        // Runs of whitespace between fields are tolerated; the name keeps
        // its internal spacing.
        let (_, rest) = split_field(body.trim());
        let (email, rest) = split_field(rest);
        let (password, name) = split_field(rest);
        let name = name.trim_end();
        if !email.contains('@') || password.is_empty() || name.is_empty() {
            return Ok(format_registration_usage());
        }

        if get_user_by_email(&state.db, email).await?.is_some() {
            return Ok(format_email_taken());
        }

        let user = create_user(&state.db, email, password, name, DEFAULT_CURRENCY).await?;
        {
            let conn = state.db.write().await;
            conn.execute(
                "UPDATE users SET whatsapp_phone = ? WHERE id = ?",
                (phone, user.id.as_str()),
            )
            .await?;
        }
        log::info!("self-registered account via chat for {}", phone);
        return Ok(format_registration_ok(name));
    }

    Ok(format_not_linked())
}

async fn handle_linked(
    state: &AppState,
    user: &User,
    body: &str,
    media: Option<&MediaPayload>,
) -> anyhow::Result<String> {
    if let Some(command) = Command::parse(body) {
        let conn = state.db.read().await;
        return Ok(match command {
            Command::MonthlySummary => format_monthly_summary(&monthly_summary(&conn, &user.id).await?),
            Command::WeeklySummary => format_weekly_summary(&weekly_summary(&conn, &user.id).await?),
            Command::LastExpenses => {
                format_last_expenses(&last_expenses(&conn, &user.id, crate::constants::LAST_EXPENSES_COUNT).await?)
            }
            Command::Help => format_help(),
        });
    }

    if let Some(media) = media {
        return handle_media(state, user, media, body).await;
    }

    let body = body.trim();
    if body.is_empty() {
        return Ok(format_help());
    }

    // Free text with no recognized command: the whole body is treated as a
    // natural-language expense description.
    match state.extractor.extract_from_text(body, now_ts()).await {
        Ok(candidate) => {
            let (expense, duplicate) =
                save_expense(&state.db, &candidate, user, Source::Text, body, None).await?;
            let conn = state.db.read().await;
            let detail = get_expense_detail(&conn, &expense.id).await?;
            Ok(format_expense_saved(&detail, duplicate.as_ref()))
        }
        Err(ExtractError::Backend(msg)) => Err(anyhow::anyhow!("text extraction failed: {}", msg)),
        Err(_) => Ok(format_expense_error(None)),
    }
}

async fn handle_media(
    state: &AppState,
    user: &User,
    media: &MediaPayload,
    caption: &str,
) -> anyhow::Result<String> {
    let bytes = state.messaging.download_media(&media.url).await?;

    if media.content_type.starts_with("image/") {
        let candidate = match state
            .extractor
            .extract_from_image(&bytes, &media.content_type, Some(caption), now_ts())
            .await
        {
            Ok(candidate) => candidate,
            Err(ExtractError::Backend(msg)) => {
                return Err(anyhow::anyhow!("image extraction failed: {}", msg));
            }
            Err(_) => {
                return Ok(
                    "❌ No pude leer el ticket. Asegúrate de que la imagen sea clara y muestre el monto total."
                        .to_string(),
                );
            }
        };
        let file_hash = compute_file_hash(&bytes);
        let (expense, duplicate) = save_expense(
            &state.db,
            &candidate,
            user,
            Source::Image,
            "imagen",
            Some(&file_hash),
        )
        .await?;
        let conn = state.db.read().await;
        let detail = get_expense_detail(&conn, &expense.id).await?;
        return Ok(format_expense_saved(&detail, duplicate.as_ref()));
    }

    if media.content_type.starts_with("audio/") {
        let transcription = match state.extractor.transcribe(&bytes, &media.content_type).await {
            Ok(transcription) => transcription,
            Err(ExtractError::Backend(msg)) => {
                return Err(anyhow::anyhow!("transcription failed: {}", msg));
            }
            Err(_) => {
                return Ok("❌ No pude transcribir el audio. Intenta de nuevo con más claridad."
                    .to_string());
            }
        };
        // Audio bytes are never hashed for dedup; only the fingerprint
        // strategy applies on this path.
        let candidate = match state.extractor.extract_from_text(&transcription, now_ts()).await {
            Ok(candidate) => candidate,
            Err(ExtractError::Backend(msg)) => {
                return Err(anyhow::anyhow!("text extraction failed: {}", msg));
            }
            Err(_) => {
                return Ok(format_expense_error(Some(&format!(
                    "Transcribí: \"{}\"",
                    transcription
                ))));
            }
        };
        let (expense, duplicate) =
            save_expense(&state.db, &candidate, user, Source::Audio, &transcription, None).await?;
        let conn = state.db.read().await;
        let detail = get_expense_detail(&conn, &expense.id).await?;
        return Ok(format!(
            "🎤 _{}_\n\n{}",
            transcription,
            format_expense_saved(&detail, duplicate.as_ref())
        ));
    }

    if media.content_type == "application/pdf" {
        let candidates = state.extractor.extract_bank_statement(&bytes, now_ts()).await?;
        if candidates.is_empty() {
            return Ok(
                "❌ No encontré transacciones en el PDF. ¿Es un estado de cuenta bancario?"
                    .to_string(),
            );
        }

        let mut total = Decimal::ZERO;
        let mut duplicates_count = 0;
        let mut currency = user.currency.clone();
        let created = candidates.len();
        for candidate in &candidates {
            let (expense, duplicate) =
                save_expense(&state.db, candidate, user, Source::Pdf, "pdf", None).await?;
            total += expense.amount;
            currency = expense.currency;
            if duplicate.is_some() {
                duplicates_count += 1;
            }
        }

        return Ok(format_document_result(
            created,
            duplicates_count,
            total.to_f64().unwrap_or(0.0),
            &currency,
        ));
    }

    Ok(format_unsupported_media())
}

/// Inbound Twilio webhook. The payload's authenticity check must pass before
/// anything in it is trusted, unless no auth token is configured (dev mode).
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(params): Form<BTreeMap<String, String>>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    if !state.config.twilio_auth_token.is_empty() {
        let signature = headers
            .get("X-Twilio-Signature")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !verify_signature(
            &state.config.twilio_auth_token,
            &state.config.webhook_url,
            &params,
            signature,
        ) {
            log::warn!("invalid webhook signature, request rejected");
            return Err((StatusCode::FORBIDDEN, "Invalid signature".to_string()));
        }
    }

    let Some(from) = params.get("From") else {
        return Err((StatusCode::BAD_REQUEST, "Missing sender".to_string()));
    };
    let phone = from.strip_prefix("whatsapp:").unwrap_or(from).trim().to_string();
    let body = params.get("Body").map(|b| b.trim()).unwrap_or("");

    let num_media: u32 = params
        .get("NumMedia")
        .and_then(|n| n.parse().ok())
        .unwrap_or(0);
    let media = if num_media > 0 {
        match (params.get("MediaUrl0"), params.get("MediaContentType0")) {
            (Some(url), Some(content_type)) => Some(MediaPayload {
                url: url.clone(),
                content_type: content_type.clone(),
            }),
            _ => None,
        }
    } else {
        None
    };

    let reply = handle_incoming(&state, &phone, body, media.as_ref()).await;
    state.messaging.send(from, &reply).await;

    Ok(Json(serde_json::json!({"status": "ok"})))
}
