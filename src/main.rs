use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use std::sync::Arc;
use time::Duration;
use tower_http::cors::CorsLayer;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, cookie::Key};

use gastobot_server::AppState;
use gastobot_server::config::Config;
use gastobot_server::constants::{MAX_FILE_SIZE, SESSION_EXPIRY_DAYS, SESSION_NAME};
use gastobot_server::extractor::OpenAiExtractor;
use gastobot_server::messaging::TwilioProvider;
use gastobot_server::{auth, categories, database, expenses, link_tokens, stats, upload, whatsapp};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = Config::from_env().expect("Invalid configuration");

    let db = database::init_db(&config.data_path)
        .await
        .expect("Failed to initialize database");

    let extractor = Arc::new(OpenAiExtractor::new(config.openai_api_key.clone()));
    let messaging = Arc::new(TwilioProvider::new(
        config.twilio_account_sid.clone(),
        config.twilio_auth_token.clone(),
        config.twilio_whatsapp_from.clone(),
    ));

    let store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(store)
        .with_secure(false)
        .with_name(SESSION_NAME)
        .with_expiry(Expiry::OnInactivity(Duration::days(SESSION_EXPIRY_DAYS)))
        .with_signed(Key::try_from(config.session_secret.as_bytes()).unwrap());

    let bind_address = config.bind_address();
    let state = AppState {
        db,
        config,
        extractor,
        messaging,
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route(
            "/expenses",
            post(expenses::create_expense).get(expenses::get_expenses),
        )
        .route("/expenses/{id}", axum::routing::delete(expenses::delete_expense))
        .route("/categories", get(categories::get_categories))
        .route("/stats/monthly", get(stats::monthly_stats))
        .route("/stats/weekly", get(stats::weekly_stats))
        .route("/upload/image", post(upload::upload_image))
        .route("/upload/audio", post(upload::upload_audio))
        .route("/upload/pdf", post(upload::upload_pdf))
        .route("/whatsapp/webhook", post(whatsapp::webhook))
        .route("/whatsapp/link-pin", post(link_tokens::create_link_pin))
        .layer(DefaultBodyLimit::max(MAX_FILE_SIZE + 1024))
        .layer(CorsLayer::permissive())
        .layer(session_layer)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await.unwrap();
    log::info!("server running on http://{}", bind_address);

    axum::serve(listener, app).await.unwrap();
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok", "service": "gastobot"}))
}
