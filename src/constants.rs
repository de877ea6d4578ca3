// Server configuration
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: &str = "3000";
pub const DEFAULT_DATA_PATH: &str = "data";
pub const DEFAULT_CURRENCY: &str = "MXN";

// Session configuration
pub const SESSION_NAME: &str = "gastobot_session";
pub const SESSION_EXPIRY_DAYS: i64 = 3;
pub const MIN_SESSION_SECRET_LENGTH: usize = 64;

// Query limits and defaults
pub const DEFAULT_EXPENSES_LIMIT: u32 = 20;
pub const MAX_LIMIT: u32 = 100;
pub const LAST_EXPENSES_COUNT: u32 = 5;
pub const SUMMARY_TOP_CATEGORIES: usize = 5;

// Validation limits
pub const MAX_DESCRIPTION_LENGTH: usize = 255;
pub const MAX_NAME_LENGTH: usize = 100;
pub const MIN_PASSWORD_LENGTH: usize = 6;
pub const MAX_FILE_SIZE: usize = 20 * 1024 * 1024; // 20 MB

// Link token (WhatsApp PIN) configuration
pub const LINK_TOKEN_DIGITS: usize = 6;
pub const LINK_TOKEN_TTL_MINUTES: i64 = 10;

// Duplicate detection: a fingerprint match must fall within ±1 day of the
// candidate's date. Bank statements can post a charge a day after purchase.
pub const DUPLICATE_WINDOW_SECONDS: i64 = 24 * 60 * 60;

// Global category catalog, seeded once at startup. Extractor output is
// normalized against these names; anything else maps to FALLBACK_CATEGORY.
pub const GLOBAL_CATEGORIES: &[(&str, &str)] = &[
    ("Alimentación", "🍔"),
    ("Transporte", "🚗"),
    ("Hogar", "🏠"),
    ("Entretenimiento", "🎬"),
    ("Ropa", "👕"),
    ("Salud", "💊"),
    ("Tecnología", "📱"),
    ("Educación", "📚"),
    ("Trabajo", "💼"),
    ("Servicios", "🔧"),
    ("Regalos", "🎁"),
    ("Otros", "💰"),
];
pub const FALLBACK_CATEGORY: &str = "Otros";
pub const DEFAULT_CATEGORY_EMOJI: &str = "💰";

// Error messages
pub const ERR_DATABASE_OPERATION: &str = "Database operation failed";
pub const ERR_UNAUTHORIZED: &str = "Not logged in";
