use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub currency: String,
    pub whatsapp_phone: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PublicUser {
    pub id: String,
    pub email: String,
    pub name: String,
    pub currency: String,
}

/// Input modality that produced an expense. Closed set; anything arriving via
/// the WhatsApp channel still carries the modality of its payload.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Text,
    Audio,
    Image,
    Pdf,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Text => "text",
            Source::Audio => "audio",
            Source::Image => "image",
            Source::Pdf => "pdf",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Source> {
        match tag {
            "text" => Some(Source::Text),
            "audio" => Some(Source::Audio),
            "image" => Some(Source::Image),
            "pdf" => Some(Source::Pdf),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub emoji: String,
    /// None marks a global category shared by every account.
    pub user_id: Option<String>,
}

/// Structured guess produced by an extractor; not yet persisted. The amount is
/// already normalized to two decimal places and the category name to the
/// closed catalog by the time a candidate leaves the extractor adapter.
#[derive(Debug, Clone)]
pub struct CandidateExpense {
    pub amount: Decimal,
    pub currency: Option<String>,
    pub description: String,
    pub category_name: String,
    /// Unix timestamp; None is resolved to "now" at write time.
    pub date: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Expense {
    pub id: String,
    pub user_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub category_id: Option<String>,
    pub date: i64,
    pub source: Source,
    pub raw_input: Option<String>,
    /// SHA-256 of the submitted bytes; only present for binary-file channels.
    pub file_hash: Option<String>,
    pub created_at: i64,
}

/// Compact view of a previously stored expense flagged as a probable
/// duplicate of a new submission.
#[derive(Serialize, Debug, Clone)]
pub struct DuplicateInfo {
    pub id: String,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub date: i64,
    pub source: Source,
}

impl DuplicateInfo {
    pub fn from_expense(expense: &Expense) -> DuplicateInfo {
        DuplicateInfo {
            id: expense.id.clone(),
            amount: expense.amount,
            currency: expense.currency.clone(),
            description: expense.description.clone(),
            date: expense.date,
            source: expense.source,
        }
    }
}

/// Expense joined with its category's display fields, for lists and replies.
#[derive(Serialize, Debug, Clone)]
pub struct ExpenseDetail {
    #[serde(flatten)]
    pub expense: Expense,
    pub category_name: Option<String>,
    pub category_emoji: Option<String>,
}

#[derive(Serialize, Debug, Clone)]
pub struct CategoryTotal {
    pub name: String,
    pub emoji: String,
    pub total: f64,
}

#[derive(Serialize, Debug)]
pub struct Summary {
    pub total: f64,
    pub by_category: Vec<CategoryTotal>,
    pub recent: Vec<ExpenseDetail>,
    pub start: i64,
    pub end: i64,
}

// Request / response payloads

#[derive(Deserialize, Debug)]
pub struct RegisterPayload {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Deserialize, Debug)]
pub struct LoginPayload {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, Debug)]
pub struct CreateExpensePayload {
    pub text: String,
}

#[derive(Serialize, Debug)]
pub struct ExpenseWithDuplicate {
    #[serde(flatten)]
    pub expense: ExpenseDetail,
    pub possible_duplicate: Option<DuplicateInfo>,
}

#[derive(Deserialize, Debug)]
pub struct GetExpensesQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub category_id: Option<String>,
    pub date_from: Option<i64>,
    pub date_to: Option<i64>,
}

#[derive(Serialize, Debug)]
pub struct GetExpensesResponse {
    pub items: Vec<ExpenseDetail>,
    pub total: u32,
    pub page: u32,
    pub limit: u32,
}

#[derive(Serialize, Debug)]
pub struct DocumentImportResult {
    pub created: usize,
    pub duplicates_count: usize,
    pub expenses: Vec<ExpenseWithDuplicate>,
}

#[derive(Serialize, Debug)]
pub struct LinkPinResponse {
    pub pin: String,
    pub expires_in_minutes: i64,
}
