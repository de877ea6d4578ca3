use async_trait::async_trait;
use base64::Engine;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, PrimitiveDateTime};

use crate::constants::{FALLBACK_CATEGORY, GLOBAL_CATEGORIES, MAX_DESCRIPTION_LENGTH};
use crate::models::CandidateExpense;
use crate::utils::normalize_amount;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const CHAT_MODEL: &str = "gpt-4o";
const TRANSCRIPTION_MODEL: &str = "whisper-1";
const REQUEST_TIMEOUT_SECS: u64 = 30;
const MAX_STATEMENT_TEXT_CHARS: usize = 12_000;

/// Closed failure taxonomy for the extraction capability. Each variant maps
/// to a specific, actionable message for the end user.
#[derive(Debug)]
pub enum ExtractError {
    /// The content had no recognizable monetary amount.
    NoAmount,
    /// The image was readable but is not a ticket or receipt.
    NotAReceipt,
    /// Audio could not be turned into text.
    TranscriptionFailed,
    /// Transport failure, timeout or malformed backend response.
    Backend(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::NoAmount => write!(f, "no recognizable amount in the input"),
            ExtractError::NotAReceipt => write!(f, "the image is not a ticket or receipt"),
            ExtractError::TranscriptionFailed => write!(f, "audio transcription failed"),
            ExtractError::Backend(msg) => write!(f, "extraction backend error: {}", msg),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Capability that turns raw channel input into candidate expenses. Injected
/// into the pipeline and the dispatcher so tests can substitute a fake.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract_from_text(
        &self,
        text: &str,
        reference_date: i64,
    ) -> Result<CandidateExpense, ExtractError>;

    async fn extract_from_image(
        &self,
        bytes: &[u8],
        mime_type: &str,
        caption: Option<&str>,
        reference_date: i64,
    ) -> Result<CandidateExpense, ExtractError>;

    async fn transcribe(&self, bytes: &[u8], mime_type: &str) -> Result<String, ExtractError>;

    /// Extracts every charge found in a bank-statement document. An empty
    /// list means no usable transactions, which is not an error.
    async fn extract_bank_statement(
        &self,
        bytes: &[u8],
        reference_date: i64,
    ) -> Result<Vec<CandidateExpense>, ExtractError>;
}

/// Maps an extractor-supplied category name onto the closed catalog. Names
/// the catalog does not know become the fallback category instead of being
/// rejected.
pub fn normalize_category(name: &str) -> String {
    let trimmed = name.trim();
    for (catalog_name, _) in GLOBAL_CATEGORIES {
        if *catalog_name == trimmed {
            return (*catalog_name).to_string();
        }
    }
    FALLBACK_CATEGORY.to_string()
}

/// Parses the date formats the extraction model is prompted to produce:
/// RFC 3339, bare ISO date-time, or a plain date.
pub fn parse_candidate_date(value: &str) -> Option<i64> {
    if let Ok(dt) = time::OffsetDateTime::parse(value, &Rfc3339) {
        return Some(dt.unix_timestamp());
    }

    let datetime_format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    if let Ok(dt) = PrimitiveDateTime::parse(value, &datetime_format) {
        return Some(dt.assume_utc().unix_timestamp());
    }

    let date_format = format_description!("[year]-[month]-[day]");
    if let Ok(date) = Date::parse(value, &date_format) {
        return Some(date.midnight().assume_utc().unix_timestamp());
    }

    None
}

/// Raw shape of the model's JSON reply. Converted into either a
/// `CandidateExpense` or an `ExtractError` immediately; never inspected ad
/// hoc past this boundary.
#[derive(Deserialize, Debug)]
struct RawExtraction {
    error: Option<String>,
    amount: Option<f64>,
    currency: Option<String>,
    description: Option<String>,
    category_name: Option<String>,
    date: Option<String>,
    merchant: Option<String>,
}

impl RawExtraction {
    fn into_candidate(self, reference_date: i64) -> Result<CandidateExpense, ExtractError> {
        if let Some(code) = self.error {
            return Err(match code.as_str() {
                "no_amount" => ExtractError::NoAmount,
                "not_a_receipt" => ExtractError::NotAReceipt,
                other => ExtractError::Backend(format!("extractor reported: {}", other)),
            });
        }

        let raw_amount = self.amount.ok_or(ExtractError::NoAmount)?;
        let amount = Decimal::try_from(raw_amount).map_err(|_| ExtractError::NoAmount)?;
        if amount <= Decimal::ZERO {
            return Err(ExtractError::NoAmount);
        }

        let mut description = self
            .description
            .unwrap_or_else(|| "Gasto".to_string())
            .trim()
            .to_string();
        if let Some(merchant) = self.merchant {
            if !merchant.is_empty() && !description.contains(&merchant) {
                description = format!("{} — {}", merchant, description);
            }
        }
        if description.chars().count() > MAX_DESCRIPTION_LENGTH {
            description = description.chars().take(MAX_DESCRIPTION_LENGTH).collect();
        }

        let date = self
            .date
            .as_deref()
            .and_then(parse_candidate_date)
            .or(Some(reference_date));

        Ok(CandidateExpense {
            amount: normalize_amount(amount),
            currency: self.currency.filter(|c| !c.trim().is_empty()),
            description,
            category_name: normalize_category(self.category_name.as_deref().unwrap_or("")),
            date,
        })
    }
}

fn catalog_names() -> String {
    GLOBAL_CATEGORIES
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn text_system_prompt() -> String {
    format!(
        "Eres un asistente que extrae información de gastos de mensajes en español.\n\
         Analiza el texto y devuelve un JSON con los campos:\n\
         - amount: número decimal con el monto del gasto (solo el número)\n\
         - currency: código de moneda ISO 4217 (por defecto \"MXN\")\n\
         - description: descripción corta del gasto (máximo 100 caracteres)\n\
         - category_name: una de estas categorías exactas: {}\n\
         - date: fecha del gasto en formato ISO 8601, o null si no se menciona\n\
         Responde ÚNICAMENTE con el JSON, sin texto adicional, sin markdown.\n\
         Si no puedes identificar un monto claro, devuelve {{\"error\": \"no_amount\"}}.",
        catalog_names()
    )
}

fn vision_system_prompt() -> String {
    format!(
        "Eres un asistente experto en analizar tickets y recibos de compra.\n\
         Analiza la imagen y devuelve un JSON con: amount, currency (ISO 4217,\n\
         por defecto \"MXN\"), description (máximo 100 caracteres),\n\
         category_name (una de: {}), date (ISO 8601 si es visible, si no null)\n\
         y merchant (nombre del comercio si es visible, si no null).\n\
         Si la imagen NO es un ticket o recibo, devuelve {{\"error\": \"not_a_receipt\"}}.\n\
         Si no puedes leer el monto total, devuelve {{\"error\": \"no_amount\"}}.\n\
         Responde ÚNICAMENTE con el JSON, sin texto adicional.",
        catalog_names()
    )
}

fn statement_system_prompt() -> String {
    format!(
        "Eres un asistente experto en analizar estados de cuenta bancarios.\n\
         Se te proporciona el texto extraído de un PDF. Identifica TODOS los\n\
         gastos/cargos/compras (no depósitos ni ingresos) y devuelve un array\n\
         JSON donde cada elemento tiene: amount (decimal positivo), currency\n\
         (ISO 4217, por defecto \"MXN\"), description (máximo 100 caracteres),\n\
         category_name (una de: {}) y date (YYYY-MM-DD o null).\n\
         Si el documento no es un estado de cuenta o no hay gastos, devuelve [].\n\
         Responde ÚNICAMENTE con el JSON array, sin texto adicional.",
        catalog_names()
    )
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Production extractor: GPT-4o for text/image/statement parsing, Whisper for
/// transcription, `pdf-extract` for pulling statement text out of PDFs.
pub struct OpenAiExtractor {
    client: reqwest::Client,
    api_key: String,
}

impl OpenAiExtractor {
    pub fn new(api_key: String) -> OpenAiExtractor {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("failed to build HTTP client");
        OpenAiExtractor { client, api_key }
    }

    async fn chat_completion(
        &self,
        system_prompt: &str,
        user_content: serde_json::Value,
        max_tokens: u32,
    ) -> Result<String, ExtractError> {
        let body = serde_json::json!({
            "model": CHAT_MODEL,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_content},
            ],
            "temperature": 0,
            "max_tokens": max_tokens,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", OPENAI_API_BASE))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExtractError::Backend(e.to_string()))?
            .error_for_status()
            .map_err(|e| ExtractError::Backend(e.to_string()))?;

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ExtractError::Backend(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| ExtractError::Backend("empty completion".to_string()))
    }
}

fn reference_date_line(reference_date: i64) -> String {
    let formatted = time::OffsetDateTime::from_unix_timestamp(reference_date)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_default();
    format!("Fecha actual: {}", formatted)
}

#[async_trait]
impl Extractor for OpenAiExtractor {
    async fn extract_from_text(
        &self,
        text: &str,
        reference_date: i64,
    ) -> Result<CandidateExpense, ExtractError> {
        let user = serde_json::json!(format!(
            "{}\n\nMensaje: {}",
            reference_date_line(reference_date),
            text
        ));
        let raw = self.chat_completion(&text_system_prompt(), user, 300).await?;
        let extraction: RawExtraction = serde_json::from_str(&raw).map_err(|e| {
            log::error!("unparseable text extraction reply: {} | raw: {}", e, raw);
            ExtractError::Backend(e.to_string())
        })?;
        extraction.into_candidate(reference_date)
    }

    async fn extract_from_image(
        &self,
        bytes: &[u8],
        mime_type: &str,
        caption: Option<&str>,
        reference_date: i64,
    ) -> Result<CandidateExpense, ExtractError> {
        let image_b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
        let mut parts = vec![serde_json::json!({
            "type": "text",
            "text": reference_date_line(reference_date),
        })];
        if let Some(caption) = caption.filter(|c| !c.trim().is_empty()) {
            parts.push(serde_json::json!({
                "type": "text",
                "text": format!("Nota adicional del usuario: {}", caption),
            }));
        }
        parts.push(serde_json::json!({
            "type": "image_url",
            "image_url": {
                "url": format!("data:{};base64,{}", mime_type, image_b64),
                "detail": "high",
            },
        }));

        let raw = self
            .chat_completion(&vision_system_prompt(), serde_json::Value::Array(parts), 400)
            .await?;
        let extraction: RawExtraction = serde_json::from_str(&raw).map_err(|e| {
            log::error!("unparseable vision reply: {} | raw: {}", e, raw);
            ExtractError::Backend(e.to_string())
        })?;
        extraction.into_candidate(reference_date)
    }

    async fn transcribe(&self, bytes: &[u8], mime_type: &str) -> Result<String, ExtractError> {
        let extension = mime_to_extension(mime_type);
        let part = reqwest::multipart::Part::bytes(bytes.to_vec())
            .file_name(format!("audio.{}", extension))
            .mime_str(mime_type)
            .map_err(|e| ExtractError::Backend(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("model", TRANSCRIPTION_MODEL)
            .text("language", "es")
            .part("file", part);

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", OPENAI_API_BASE))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ExtractError::Backend(e.to_string()))?
            .error_for_status()
            .map_err(|_| ExtractError::TranscriptionFailed)?;

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|_| ExtractError::TranscriptionFailed)?;

        let transcription = parsed.text.trim().to_string();
        if transcription.is_empty() {
            return Err(ExtractError::TranscriptionFailed);
        }
        log::info!("audio transcribed ({} chars)", transcription.len());
        Ok(transcription)
    }

    async fn extract_bank_statement(
        &self,
        bytes: &[u8],
        reference_date: i64,
    ) -> Result<Vec<CandidateExpense>, ExtractError> {
        let text = match pdf_extract::extract_text_from_mem(bytes) {
            Ok(text) => text,
            Err(e) => {
                log::warn!("PDF text extraction failed: {}", e);
                return Ok(Vec::new());
            }
        };
        if text.trim().is_empty() {
            log::warn!("PDF has no extractable text");
            return Ok(Vec::new());
        }

        let mut statement_text = text;
        if statement_text.chars().count() > MAX_STATEMENT_TEXT_CHARS {
            statement_text = statement_text
                .chars()
                .take(MAX_STATEMENT_TEXT_CHARS)
                .collect::<String>()
                + "\n[...texto truncado...]";
        }

        let user = serde_json::json!(format!(
            "{}\n\nContenido del estado de cuenta:\n{}",
            reference_date_line(reference_date),
            statement_text
        ));
        let raw = self
            .chat_completion(&statement_system_prompt(), user, 2000)
            .await?;

        let entries: Vec<RawExtraction> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                log::error!("unparseable statement reply: {} | raw: {}", e, raw);
                return Ok(Vec::new());
            }
        };

        let candidates: Vec<CandidateExpense> = entries
            .into_iter()
            .filter_map(|entry| entry.into_candidate(reference_date).ok())
            .collect();
        log::info!("statement import: {} transactions extracted", candidates.len());
        Ok(candidates)
    }
}

fn mime_to_extension(mime_type: &str) -> &'static str {
    match mime_type {
        "audio/ogg" | "audio/ogg; codecs=opus" => "ogg",
        "audio/mpeg" => "mp3",
        "audio/mp4" => "m4a",
        "audio/wav" => "wav",
        _ => "webm",
    }
}
