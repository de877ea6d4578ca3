/*!
 * Conversational dispatcher tests: linking, self-registration, commands,
 * free-text capture, media branches and the webhook signature check.
 */

mod common;

use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use gastobot_server::auth::{get_user_by_email, get_user_by_phone};
use gastobot_server::database::{Db, now_ts};
use gastobot_server::expenses::compute_file_hash;
use gastobot_server::messaging::verify_signature;
use gastobot_server::whatsapp::{Command, MediaPayload, handle_incoming};

use common::{
    FakeExtractor, FakeMessaging, candidate, count_expenses, create_test_expense,
    create_test_user, link_phone, setup_test_db, test_state,
};

const PHONE: &str = "+5215550001111";
const DAY: i64 = 24 * 60 * 60;

fn state_with(db: Db, extractor: FakeExtractor) -> gastobot_server::AppState {
    test_state(db, Arc::new(extractor), Arc::new(FakeMessaging::default()))
}

async fn insert_token(db: &Db, user_id: &str, code: &str) {
    let conn = db.write().await;
    conn.execute(
        "INSERT INTO link_tokens (id, user_id, token, expires_at, used, created_at)
         VALUES (?, ?, ?, ?, 0, ?)",
        (
            Uuid::new_v4().to_string().as_str(),
            user_id,
            code,
            now_ts() + 600,
            now_ts(),
        ),
    )
    .await
    .expect("Failed to insert link token");
}

#[test]
fn test_command_parsing() {
    assert_eq!(Command::parse("resumen"), Some(Command::MonthlySummary));
    assert_eq!(Command::parse("  RESUMEN "), Some(Command::MonthlySummary));
    assert_eq!(Command::parse("semana"), Some(Command::WeeklySummary));
    assert_eq!(Command::parse("últimos"), Some(Command::LastExpenses));
    assert_eq!(Command::parse("ultimos"), Some(Command::LastExpenses));
    assert_eq!(Command::parse("ayuda"), Some(Command::Help));
    assert_eq!(Command::parse("help"), Some(Command::Help));
    assert_eq!(Command::parse("gasté 150 en el súper"), None);
    assert_eq!(Command::parse("resumen mensual"), None);
}

#[tokio::test]
async fn test_unknown_number_gets_linking_instructions() {
    let db = setup_test_db().await;
    let state = state_with(db, FakeExtractor::default());

    let reply = handle_incoming(&state, PHONE, "hola", None).await;
    assert!(reply.contains("no reconozco tu número"));
    assert!(reply.contains("registro"));
}

#[tokio::test]
async fn test_invalid_pin_leaves_number_unlinked() {
    let db = setup_test_db().await;
    create_test_user(&db, "pin@example.com").await;
    let state = state_with(db.clone(), FakeExtractor::default());

    let reply = handle_incoming(&state, PHONE, "123456", None).await;
    assert!(reply.contains("PIN inválido o expirado"));

    let user = get_user_by_phone(&db, PHONE)
        .await
        .expect("Failed to look up phone");
    assert!(user.is_none());
}

#[tokio::test]
async fn test_valid_pin_links_the_number() {
    let db = setup_test_db().await;
    let user = create_test_user(&db, "link@example.com").await;
    insert_token(&db, &user.id, "654321").await;
    let state = state_with(db.clone(), FakeExtractor::default());

    let reply = handle_incoming(&state, PHONE, "654321", None).await;
    assert!(reply.contains("vinculado"));
    assert!(reply.contains(&user.name));

    let linked = get_user_by_phone(&db, PHONE)
        .await
        .expect("Failed to look up phone")
        .expect("Expected the number to be linked");
    assert_eq!(linked.id, user.id);
}

#[tokio::test]
async fn test_chat_registration_creates_and_links_account() {
    let db = setup_test_db().await;
    let state = state_with(db.clone(), FakeExtractor::default());

    let reply = handle_incoming(
        &state,
        PHONE,
        "registro nueva@example.com secreta123 María",
        None,
    )
    .await;
    assert!(reply.contains("Cuenta creada"));
    assert!(reply.contains("María"));
    // Plaintext credentials arrived over chat; the confirmation warns.
    assert!(reply.contains("contraseñas"));

    let user = get_user_by_email(&db, "nueva@example.com")
        .await
        .expect("Failed to look up email")
        .expect("Expected the account to exist");
    assert_eq!(user.name, "María");
    assert_eq!(user.currency, "MXN");
    assert_eq!(user.whatsapp_phone.as_deref(), Some(PHONE));
}

#[tokio::test]
async fn test_chat_registration_rejects_taken_email() {
    let db = setup_test_db().await;
    create_test_user(&db, "taken@example.com").await;
    let state = state_with(db.clone(), FakeExtractor::default());

    let reply =
        handle_incoming(&state, PHONE, "registro taken@example.com pass Otro", None).await;
    assert!(reply.contains("ya tiene cuenta"));

    let user = get_user_by_phone(&db, PHONE)
        .await
        .expect("Failed to look up phone");
    assert!(user.is_none());
}

#[tokio::test]
async fn test_chat_registration_rejects_bad_format() {
    let db = setup_test_db().await;
    let state = state_with(db.clone(), FakeExtractor::default());

    // Registration keyword with too few fields gets the usage message.
    let reply = handle_incoming(&state, PHONE, "registro solodosNombre", None).await;
    assert!(reply.contains("Formato incorrecto"));

    let reply = handle_incoming(&state, PHONE, "registro sinArroba pass Nombre", None).await;
    assert!(reply.contains("Formato incorrecto"));

    let reply = handle_incoming(&state, PHONE, "registro a@b.com pass", None).await;
    assert!(reply.contains("Formato incorrecto"));

    // No whitespace after the keyword is not a registration attempt at all.
    let reply = handle_incoming(&state, PHONE, "registros masivos", None).await;
    assert!(reply.contains("no reconozco tu número"));
}

#[tokio::test]
async fn test_chat_registration_tolerates_whitespace_runs() {
    let db = setup_test_db().await;
    let state = state_with(db.clone(), FakeExtractor::default());

    let reply = handle_incoming(
        &state,
        PHONE,
        "registro  doble@example.com   secreta123 Juan Pérez",
        None,
    )
    .await;
    assert!(reply.contains("Cuenta creada"));

    let user = get_user_by_email(&db, "doble@example.com")
        .await
        .expect("Failed to look up email")
        .expect("Expected the account to exist");
    // The name keeps its internal spacing.
    assert_eq!(user.name, "Juan Pérez");
}

#[tokio::test]
async fn test_help_command_and_empty_body() {
    let db = setup_test_db().await;
    let user = create_test_user(&db, "help@example.com").await;
    link_phone(&db, &user.id, PHONE).await;
    let state = state_with(db, FakeExtractor::default());

    let reply = handle_incoming(&state, PHONE, "ayuda", None).await;
    assert!(reply.contains("comandos disponibles"));

    let reply = handle_incoming(&state, PHONE, "", None).await;
    assert!(reply.contains("comandos disponibles"));
}

#[tokio::test]
async fn test_summary_commands_with_no_expenses() {
    let db = setup_test_db().await;
    let user = create_test_user(&db, "empty@example.com").await;
    link_phone(&db, &user.id, PHONE).await;
    let state = state_with(db, FakeExtractor::default());

    let reply = handle_incoming(&state, PHONE, "resumen", None).await;
    assert!(reply.contains("Resumen del mes"));
    assert!(reply.contains("No hay gastos"));

    let reply = handle_incoming(&state, PHONE, "últimos", None).await;
    assert!(reply.contains("No tienes gastos"));
}

#[tokio::test]
async fn test_weekly_command_reports_totals() {
    let db = setup_test_db().await;
    let user = create_test_user(&db, "weekly@example.com").await;
    link_phone(&db, &user.id, PHONE).await;
    create_test_expense(&db, &user.id, "100.00", "MXN", now_ts() - DAY, "text", None).await;
    create_test_expense(&db, &user.id, "50.00", "MXN", now_ts() - 2 * DAY, "text", None).await;
    let state = state_with(db, FakeExtractor::default());

    let reply = handle_incoming(&state, PHONE, "semana", None).await;
    assert!(reply.contains("Últimos 7 días"));
    assert!(reply.contains("$150.00"));
}

#[tokio::test]
async fn test_free_text_saves_expense() {
    let db = setup_test_db().await;
    let user = create_test_user(&db, "text@example.com").await;
    link_phone(&db, &user.id, PHONE).await;

    let date = now_ts() - 5 * DAY;
    let extractor = FakeExtractor {
        text_candidate: Some(candidate("150", None, "Alimentación", Some(date))),
        ..Default::default()
    };
    let state = state_with(db.clone(), extractor);

    let reply = handle_incoming(&state, PHONE, "gasté 150 en el súper", None).await;
    assert!(reply.contains("Gasto guardado"));
    assert!(reply.contains("$150.00 MXN"));
    assert!(reply.contains("Alimentación"));

    assert_eq!(count_expenses(&db, &user.id).await, 1);
    let conn = db.read().await;
    let mut rows = conn
        .query(
            "SELECT amount, currency, source, raw_input FROM expenses WHERE user_id = ?",
            [user.id.as_str()],
        )
        .await
        .expect("Failed to query expense");
    let row = rows
        .next()
        .await
        .expect("Failed to read row")
        .expect("Missing expense row");
    assert_eq!(row.get::<String>(0).unwrap(), "150.00");
    assert_eq!(row.get::<String>(1).unwrap(), "MXN");
    assert_eq!(row.get::<String>(2).unwrap(), "text");
    assert_eq!(row.get::<String>(3).unwrap(), "gasté 150 en el súper");
}

#[tokio::test]
async fn test_free_text_without_expense_apologizes() {
    let db = setup_test_db().await;
    let user = create_test_user(&db, "noexpense@example.com").await;
    link_phone(&db, &user.id, PHONE).await;
    let state = state_with(db.clone(), FakeExtractor::default());

    let reply = handle_incoming(&state, PHONE, "buenos días", None).await;
    assert!(reply.contains("No pude identificar un gasto"));
    assert_eq!(count_expenses(&db, &user.id).await, 0);
}

#[tokio::test]
async fn test_backend_failure_yields_generic_apology() {
    let db = setup_test_db().await;
    let user = create_test_user(&db, "backend@example.com").await;
    link_phone(&db, &user.id, PHONE).await;

    let extractor = FakeExtractor {
        text_backend_error: true,
        ..Default::default()
    };
    let state = state_with(db, extractor);

    let reply = handle_incoming(&state, PHONE, "gasté 150", None).await;
    assert!(reply.contains("Ocurrió un error"));
}

#[tokio::test]
async fn test_image_media_saves_expense_with_hash() {
    let db = setup_test_db().await;
    let user = create_test_user(&db, "image@example.com").await;
    link_phone(&db, &user.id, PHONE).await;

    let bytes = b"jpeg receipt bytes".to_vec();
    let extractor = FakeExtractor {
        image_candidate: Some(candidate("320.5", Some("MXN"), "Alimentación", None)),
        ..Default::default()
    };
    let messaging = Arc::new(FakeMessaging {
        media: bytes.clone(),
        ..Default::default()
    });
    let state = test_state(db.clone(), Arc::new(extractor), messaging);

    let media = MediaPayload {
        url: "https://media.example/0".to_string(),
        content_type: "image/jpeg".to_string(),
    };
    let reply = handle_incoming(&state, PHONE, "", Some(&media)).await;
    assert!(reply.contains("Gasto guardado"));
    assert!(reply.contains("$320.50"));

    let conn = db.read().await;
    let mut rows = conn
        .query(
            "SELECT source, file_hash FROM expenses WHERE user_id = ?",
            [user.id.as_str()],
        )
        .await
        .expect("Failed to query expense");
    let row = rows
        .next()
        .await
        .expect("Failed to read row")
        .expect("Missing expense row");
    assert_eq!(row.get::<String>(0).unwrap(), "image");
    assert_eq!(
        row.get::<String>(1).unwrap(),
        compute_file_hash(&bytes)
    );
}

#[tokio::test]
async fn test_resent_image_is_flagged_as_duplicate() {
    let db = setup_test_db().await;
    let user = create_test_user(&db, "dupimage@example.com").await;
    link_phone(&db, &user.id, PHONE).await;

    let bytes = b"same jpeg twice".to_vec();
    let extractor = FakeExtractor {
        image_candidate: Some(candidate("99", Some("MXN"), "Otros", None)),
        ..Default::default()
    };
    let messaging = Arc::new(FakeMessaging {
        media: bytes,
        ..Default::default()
    });
    let state = test_state(db.clone(), Arc::new(extractor), messaging);

    let media = MediaPayload {
        url: "https://media.example/0".to_string(),
        content_type: "image/jpeg".to_string(),
    };
    let first = handle_incoming(&state, PHONE, "", Some(&media)).await;
    assert!(!first.contains("Posible duplicado"));

    let second = handle_incoming(&state, PHONE, "", Some(&media)).await;
    assert!(second.contains("Posible duplicado"));
    assert_eq!(count_expenses(&db, &user.id).await, 2);
}

#[tokio::test]
async fn test_unreadable_image_reports_error() {
    let db = setup_test_db().await;
    let user = create_test_user(&db, "badimage@example.com").await;
    link_phone(&db, &user.id, PHONE).await;
    let state = state_with(db.clone(), FakeExtractor::default());

    let media = MediaPayload {
        url: "https://media.example/0".to_string(),
        content_type: "image/png".to_string(),
    };
    let reply = handle_incoming(&state, PHONE, "", Some(&media)).await;
    assert!(reply.contains("No pude leer el ticket"));
    assert_eq!(count_expenses(&db, &user.id).await, 0);
}

#[tokio::test]
async fn test_audio_media_echoes_transcription() {
    let db = setup_test_db().await;
    let user = create_test_user(&db, "audio@example.com").await;
    link_phone(&db, &user.id, PHONE).await;

    let extractor = FakeExtractor {
        transcription: Some("gasté doscientos en gasolina".to_string()),
        text_candidate: Some(candidate("200", Some("MXN"), "Transporte", None)),
        ..Default::default()
    };
    let messaging = Arc::new(FakeMessaging {
        media: b"ogg bytes".to_vec(),
        ..Default::default()
    });
    let state = test_state(db.clone(), Arc::new(extractor), messaging);

    let media = MediaPayload {
        url: "https://media.example/0".to_string(),
        content_type: "audio/ogg".to_string(),
    };
    let reply = handle_incoming(&state, PHONE, "", Some(&media)).await;
    assert!(reply.starts_with("🎤"));
    assert!(reply.contains("gasté doscientos en gasolina"));
    assert!(reply.contains("Gasto guardado"));

    // Audio never carries a content hash.
    let conn = db.read().await;
    let mut rows = conn
        .query(
            "SELECT source, file_hash FROM expenses WHERE user_id = ?",
            [user.id.as_str()],
        )
        .await
        .expect("Failed to query expense");
    let row = rows
        .next()
        .await
        .expect("Failed to read row")
        .expect("Missing expense row");
    assert_eq!(row.get::<String>(0).unwrap(), "audio");
    assert!(row.get::<Option<String>>(1).unwrap().is_none());
}

#[tokio::test]
async fn test_pdf_media_aggregates_candidates() {
    let db = setup_test_db().await;
    let user = create_test_user(&db, "pdf@example.com").await;
    link_phone(&db, &user.id, PHONE).await;

    let date = now_ts() - 10 * DAY;
    // One candidate collides with an already stored expense.
    create_test_expense(&db, &user.id, "300.00", "MXN", date, "text", None).await;

    let extractor = FakeExtractor {
        statement: vec![
            candidate("100", Some("MXN"), "Alimentación", Some(date - DAY)),
            candidate("300", Some("MXN"), "Hogar", Some(date)),
            candidate("50.25", Some("MXN"), "Transporte", Some(date + DAY)),
        ],
        ..Default::default()
    };
    let messaging = Arc::new(FakeMessaging {
        media: b"%PDF-1.4 fake".to_vec(),
        ..Default::default()
    });
    let state = test_state(db.clone(), Arc::new(extractor), messaging);

    let media = MediaPayload {
        url: "https://media.example/0".to_string(),
        content_type: "application/pdf".to_string(),
    };
    let reply = handle_incoming(&state, PHONE, "", Some(&media)).await;
    assert!(reply.contains("3 transacciones guardadas"));
    assert!(reply.contains("1 posibles duplicados"));
    assert!(reply.contains("$450.25"));

    assert_eq!(count_expenses(&db, &user.id).await, 4);
}

#[tokio::test]
async fn test_pdf_without_transactions_reports_it() {
    let db = setup_test_db().await;
    let user = create_test_user(&db, "emptypdf@example.com").await;
    link_phone(&db, &user.id, PHONE).await;

    let messaging = Arc::new(FakeMessaging {
        media: b"%PDF-1.4 blank".to_vec(),
        ..Default::default()
    });
    let state = test_state(db.clone(), Arc::new(FakeExtractor::default()), messaging);

    let media = MediaPayload {
        url: "https://media.example/0".to_string(),
        content_type: "application/pdf".to_string(),
    };
    let reply = handle_incoming(&state, PHONE, "", Some(&media)).await;
    assert!(reply.contains("No encontré transacciones"));
    assert_eq!(count_expenses(&db, &user.id).await, 0);
}

#[tokio::test]
async fn test_unsupported_media_type() {
    let db = setup_test_db().await;
    let user = create_test_user(&db, "video@example.com").await;
    link_phone(&db, &user.id, PHONE).await;
    let state = state_with(db, FakeExtractor::default());

    let media = MediaPayload {
        url: "https://media.example/0".to_string(),
        content_type: "video/mp4".to_string(),
    };
    let reply = handle_incoming(&state, PHONE, "", Some(&media)).await;
    assert!(reply.contains("no soportado"));
}

fn sign(auth_token: &str, url: &str, params: &BTreeMap<String, String>) -> String {
    let mut payload = url.to_string();
    for (key, value) in params {
        payload.push_str(key);
        payload.push_str(value);
    }
    let mut mac =
        Hmac::<Sha1>::new_from_slice(auth_token.as_bytes()).expect("Failed to build HMAC");
    mac.update(payload.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

#[test]
fn test_verify_signature_accepts_valid_payload() {
    let mut params = BTreeMap::new();
    params.insert("From".to_string(), "whatsapp:+5215550001111".to_string());
    params.insert("Body".to_string(), "gasté 150".to_string());

    let url = "https://example.com/whatsapp/webhook";
    let signature = sign("token-abc", url, &params);
    assert!(verify_signature("token-abc", url, &params, &signature));
}

#[test]
fn test_verify_signature_rejects_tampering() {
    let mut params = BTreeMap::new();
    params.insert("From".to_string(), "whatsapp:+5215550001111".to_string());
    params.insert("Body".to_string(), "gasté 150".to_string());

    let url = "https://example.com/whatsapp/webhook";
    let signature = sign("token-abc", url, &params);

    // Wrong token.
    assert!(!verify_signature("other-token", url, &params, &signature));

    // Modified field.
    params.insert("Body".to_string(), "gasté 9999".to_string());
    assert!(!verify_signature("token-abc", url, &params, &signature));

    // Garbage signature.
    assert!(!verify_signature("token-abc", url, &params, "not base64!!"));
}
