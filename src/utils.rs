use axum::http::StatusCode;
use rust_decimal::Decimal;

use crate::constants::*;

pub fn db_error() -> (StatusCode, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        ERR_DATABASE_OPERATION.to_string(),
    )
}

pub fn db_error_with_context(context: &str) -> (StatusCode, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Database error: {}", context),
    )
}

pub fn validate_string_length(
    value: &str,
    field_name: &str,
    max_length: usize,
) -> Result<(), (StatusCode, String)> {
    if value.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("{} cannot be empty", field_name),
        ));
    }
    if value.len() > max_length {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("{} must be less than {} characters", field_name, max_length),
        ));
    }
    Ok(())
}

pub fn validate_limit(limit: Option<u32>, default: u32) -> Result<u32, (StatusCode, String)> {
    match limit {
        Some(0) => Err((
            StatusCode::BAD_REQUEST,
            "Limit must be greater than 0".to_string(),
        )),
        Some(l) if l > MAX_LIMIT => Err((
            StatusCode::BAD_REQUEST,
            format!("Limit cannot exceed {}", MAX_LIMIT),
        )),
        Some(l) => Ok(l),
        None => Ok(default),
    }
}

pub fn validate_page(page: Option<u32>) -> Result<u32, (StatusCode, String)> {
    match page {
        Some(0) => Err((
            StatusCode::BAD_REQUEST,
            "Page numbers start at 1".to_string(),
        )),
        Some(p) => Ok(p),
        None => Ok(1),
    }
}

/// Clamps a monetary amount to standard two-decimal money semantics. The
/// canonical text form ("150.00") is what gets stored and compared.
pub fn normalize_amount(value: Decimal) -> Decimal {
    let mut amount = value.round_dp(2);
    amount.rescale(2);
    amount
}

pub fn amount_to_storage(value: Decimal) -> String {
    normalize_amount(value).to_string()
}
