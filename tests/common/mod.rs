#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;
use uuid::Uuid;

use gastobot_server::AppState;
use gastobot_server::config::Config;
use gastobot_server::database::{Db, init_db, now_ts};
use gastobot_server::extractor::{ExtractError, Extractor};
use gastobot_server::messaging::MessagingProvider;
use gastobot_server::models::{CandidateExpense, User};

pub async fn setup_test_db() -> Db {
    let temp_dir = tempdir().expect("Failed to create temporary directory");
    let data_path = temp_dir
        .path()
        .to_str()
        .expect("Failed to convert path to string")
        .to_string();

    let db = init_db(&data_path)
        .await
        .unwrap_or_else(|e| panic!("Failed to initialize database at {}: {}", data_path, e));

    // Keep the temp_dir alive by leaking it (for test duration)
    std::mem::forget(temp_dir);

    db
}

pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: "0".to_string(),
        data_path: "unused".to_string(),
        session_secret: "x".repeat(64),
        default_currency: "MXN".to_string(),
        openai_api_key: String::new(),
        twilio_account_sid: String::new(),
        twilio_auth_token: String::new(),
        twilio_whatsapp_from: String::new(),
        webhook_url: String::new(),
    }
}

pub fn test_state(
    db: Db,
    extractor: Arc<dyn Extractor>,
    messaging: Arc<FakeMessaging>,
) -> AppState {
    AppState {
        db,
        config: test_config(),
        extractor,
        messaging,
    }
}

pub async fn create_test_user(db: &Db, email: &str) -> User {
    let user = User {
        id: Uuid::new_v4().to_string(),
        email: email.to_string(),
        name: "Test User".to_string(),
        currency: "MXN".to_string(),
        whatsapp_phone: None,
        password_hash: "not-a-real-hash".to_string(),
    };

    let conn = db.write().await;
    conn.execute(
        "INSERT INTO users (id, email, password_hash, name, currency, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        (
            user.id.as_str(),
            user.email.as_str(),
            user.password_hash.as_str(),
            user.name.as_str(),
            user.currency.as_str(),
            now_ts(),
        ),
    )
    .await
    .unwrap_or_else(|e| panic!("Failed to insert test user {}: {}", email, e));

    user
}

pub async fn link_phone(db: &Db, user_id: &str, phone: &str) {
    let conn = db.write().await;
    conn.execute(
        "UPDATE users SET whatsapp_phone = ? WHERE id = ?",
        (phone, user_id),
    )
    .await
    .expect("Failed to link test phone");
}

#[allow(clippy::too_many_arguments)]
pub async fn create_test_expense(
    db: &Db,
    user_id: &str,
    amount: &str,
    currency: &str,
    date: i64,
    source: &str,
    file_hash: Option<&str>,
) -> String {
    let expense_id = Uuid::new_v4().to_string();
    let conn = db.write().await;
    conn.execute(
        "INSERT INTO expenses (id, user_id, amount, currency, description, category_id, date, source, raw_input, file_hash, created_at)
         VALUES (?, ?, ?, ?, ?, NULL, ?, ?, NULL, ?, ?)",
        (
            expense_id.as_str(),
            user_id,
            amount,
            currency,
            "Test expense",
            date,
            source,
            file_hash,
            now_ts(),
        ),
    )
    .await
    .unwrap_or_else(|e| panic!("Failed to insert test expense for user {}: {}", user_id, e));

    expense_id
}

pub async fn count_expenses(db: &Db, user_id: &str) -> u32 {
    let conn = db.read().await;
    let mut rows = conn
        .query(
            "SELECT COUNT(*) FROM expenses WHERE user_id = ?",
            [user_id],
        )
        .await
        .expect("Failed to count expenses");

    if let Some(row) = rows.next().await.expect("Failed to read count row") {
        row.get(0).expect("Failed to get count value")
    } else {
        0
    }
}

pub fn candidate(amount: &str, currency: Option<&str>, category: &str, date: Option<i64>) -> CandidateExpense {
    CandidateExpense {
        amount: amount.parse::<Decimal>().expect("invalid test amount"),
        currency: currency.map(str::to_string),
        description: "Test candidate".to_string(),
        category_name: category.to_string(),
        date,
    }
}

/// Deterministic extractor stand-in. Each channel replies with whatever the
/// test preloaded; a `None` slot simulates the channel's extraction failure.
#[derive(Default)]
pub struct FakeExtractor {
    pub text_candidate: Option<CandidateExpense>,
    pub image_candidate: Option<CandidateExpense>,
    pub transcription: Option<String>,
    pub statement: Vec<CandidateExpense>,
    /// When set, every text extraction fails with a backend error.
    pub text_backend_error: bool,
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn extract_from_text(
        &self,
        _text: &str,
        _reference_date: i64,
    ) -> Result<CandidateExpense, ExtractError> {
        if self.text_backend_error {
            return Err(ExtractError::Backend("fake backend down".to_string()));
        }
        self.text_candidate.clone().ok_or(ExtractError::NoAmount)
    }

    async fn extract_from_image(
        &self,
        _bytes: &[u8],
        _mime_type: &str,
        _caption: Option<&str>,
        _reference_date: i64,
    ) -> Result<CandidateExpense, ExtractError> {
        self.image_candidate.clone().ok_or(ExtractError::NotAReceipt)
    }

    async fn transcribe(&self, _bytes: &[u8], _mime_type: &str) -> Result<String, ExtractError> {
        self.transcription
            .clone()
            .ok_or(ExtractError::TranscriptionFailed)
    }

    async fn extract_bank_statement(
        &self,
        _bytes: &[u8],
        _reference_date: i64,
    ) -> Result<Vec<CandidateExpense>, ExtractError> {
        Ok(self.statement.clone())
    }
}

/// Records outbound messages instead of delivering them, and serves media
/// downloads from a preloaded byte buffer.
#[derive(Default)]
pub struct FakeMessaging {
    pub media: Vec<u8>,
    pub sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl MessagingProvider for FakeMessaging {
    async fn send(&self, to: &str, body: &str) {
        self.sent
            .lock()
            .expect("sent log poisoned")
            .push((to.to_string(), body.to_string()));
    }

    async fn download_media(&self, _url: &str) -> anyhow::Result<Vec<u8>> {
        Ok(self.media.clone())
    }
}
