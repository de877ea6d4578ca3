//! Plain-text WhatsApp reply vocabulary. Wording is presentation, but the set
//! of situations covered here is part of the dispatcher's contract.

use rust_decimal::Decimal;
use time::macros::format_description;

use crate::constants::SUMMARY_TOP_CATEGORIES;
use crate::models::{Expense, ExpenseDetail, Summary};
use crate::utils::normalize_amount;

pub fn format_date(timestamp: i64) -> String {
    let format = format_description!("[day]/[month]/[year]");
    time::OffsetDateTime::from_unix_timestamp(timestamp)
        .ok()
        .and_then(|dt| dt.format(&format).ok())
        .unwrap_or_default()
}

pub fn format_amount(amount: Decimal, currency: &str) -> String {
    let amount = normalize_amount(amount);
    if currency == "MXN" {
        format!("${}", amount)
    } else {
        format!("{} ${}", currency, amount)
    }
}

fn format_amount_f64(amount: f64) -> String {
    format!("${:.2}", amount)
}

pub fn format_expense_saved(detail: &ExpenseDetail, duplicate: Option<&Expense>) -> String {
    let expense = &detail.expense;
    let category = detail.category_name.as_deref().unwrap_or("Sin categoría");
    let emoji = detail.category_emoji.as_deref().unwrap_or("💰");

    let mut lines = vec![
        "✅ *Gasto guardado*".to_string(),
        format!("📝 {}", expense.description),
        format!(
            "💵 ${} {}",
            normalize_amount(expense.amount),
            expense.currency
        ),
        format!("{} {}   📅 {}", emoji, category, format_date(expense.date)),
    ];
    if let Some(duplicate) = duplicate {
        lines.push(format!(
            "\n⚠️ _Posible duplicado de un gasto similar del {}._",
            format_date(duplicate.date)
        ));
    }
    lines.join("\n")
}

pub fn format_document_result(created: usize, duplicates: usize, total: f64, currency: &str) -> String {
    let mut lines = vec![
        "📄 *Estado de cuenta procesado*".to_string(),
        format!("✅ {} transacciones guardadas", created),
    ];
    if duplicates > 0 {
        lines.push(format!("⚠️ {} posibles duplicados", duplicates));
    }
    lines.push(format!("💵 Total: {} {}", format_amount_f64(total), currency));
    lines.join("\n")
}

fn format_summary(title: &str, summary: &Summary) -> String {
    if summary.by_category.is_empty() {
        return format!("{}\nNo hay gastos registrados en este periodo.", title);
    }

    let mut lines = vec![
        title.to_string(),
        format!("💵 Total: {} MXN", format_amount_f64(summary.total)),
        String::new(),
    ];
    for item in summary.by_category.iter().take(SUMMARY_TOP_CATEGORIES) {
        let pct = if summary.total > 0.0 {
            item.total / summary.total * 100.0
        } else {
            0.0
        };
        lines.push(format!(
            "{} {}: {} ({:.0}%)",
            item.emoji,
            item.name,
            format_amount_f64(item.total),
            pct
        ));
    }
    if summary.by_category.len() > SUMMARY_TOP_CATEGORIES {
        lines.push(format!(
            "  ...y {} categorías más",
            summary.by_category.len() - SUMMARY_TOP_CATEGORIES
        ));
    }
    lines.join("\n")
}

pub fn format_monthly_summary(summary: &Summary) -> String {
    format_summary("📊 *Resumen del mes*", summary)
}

pub fn format_weekly_summary(summary: &Summary) -> String {
    format_summary("📊 *Últimos 7 días*", summary)
}

pub fn format_last_expenses(expenses: &[ExpenseDetail]) -> String {
    if expenses.is_empty() {
        return "No tienes gastos registrados aún.".to_string();
    }

    let mut lines = vec!["📋 *Últimos gastos*".to_string()];
    for detail in expenses {
        let emoji = detail.category_emoji.as_deref().unwrap_or("💰");
        lines.push(format!(
            "{} {} — {}  _{}_",
            emoji,
            detail.expense.description,
            format_amount(detail.expense.amount, &detail.expense.currency),
            format_date(detail.expense.date)
        ));
    }
    lines.join("\n")
}

pub fn format_help() -> String {
    "🤖 *gastobot — comandos disponibles*\n\n\
     💬 Escribe un gasto en texto:\n  _\"gasté 150 en el super\"_\n\n\
     🎤 Envía una nota de voz con el gasto\n\n\
     📷 Envía una foto del ticket o recibo\n\n\
     📄 Envía un PDF de tu estado de cuenta\n\n\
     📊 *resumen* — gastos del mes actual\n\
     📅 *semana* — gastos de los últimos 7 días\n\
     📋 *últimos* — tus 5 gastos más recientes\n\
     ❓ *ayuda* — este mensaje"
        .to_string()
}

pub fn format_not_linked() -> String {
    "👋 Hola, no reconozco tu número.\n\n\
     Para vincular tu cuenta:\n\n\
     1️⃣ Abre la app web\n\
     2️⃣ Ve a *Configuración → Vincular WhatsApp*\n\
     3️⃣ Envíame el PIN de 6 dígitos que aparece ahí\n\n\
     ¿No tienes cuenta? Escribe:\n\
     _registro tu@email.com contraseña TuNombre_"
        .to_string()
}

pub fn format_expense_error(detail: Option<&str>) -> String {
    let mut msg = "❌ No pude identificar un gasto en tu mensaje.".to_string();
    if let Some(detail) = detail {
        msg.push_str(&format!("\n_{}_", detail));
    }
    msg.push_str("\n\nIntenta: _\"gasté 200 en gasolina\"_ o envía una foto del ticket.");
    msg
}

pub fn format_link_ok(name: &str) -> String {
    format!(
        "✅ ¡Listo! Tu número quedó vinculado a la cuenta de *{}*.\nYa puedes registrar gastos aquí.",
        name
    )
}

pub fn format_pin_expired() -> String {
    "❌ PIN inválido o expirado.\nGenera uno nuevo en la app: *Configuración → Vincular WhatsApp*."
        .to_string()
}

pub fn format_registration_ok(name: &str) -> String {
    format!(
        "✅ ¡Cuenta creada y número vinculado! Bienvenido, *{}*.\n\
         ⚠️ _Nota: evita enviar contraseñas por WhatsApp en el futuro._\n\n\
         Ya puedes registrar gastos aquí. Escribe *ayuda* para ver los comandos.",
        name
    )
}

pub fn format_registration_usage() -> String {
    "⚠️ Formato incorrecto. Usa:\n_registro tu@email.com contraseña TuNombre_".to_string()
}

pub fn format_email_taken() -> String {
    "❌ Ese email ya tiene cuenta.\n\
     Vincula tu número desde la app: *Configuración → Vincular WhatsApp*."
        .to_string()
}

pub fn format_unsupported_media() -> String {
    "❌ Tipo de archivo no soportado. Puedo procesar imágenes, notas de voz y PDFs.".to_string()
}

pub fn format_generic_error() -> String {
    "❌ Ocurrió un error procesando tu mensaje. Intenta de nuevo.".to_string()
}
