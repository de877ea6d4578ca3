use crate::constants::*;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: String,
    pub data_path: String,
    pub session_secret: String,
    pub default_currency: String,
    pub openai_api_key: String,
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_whatsapp_from: String,
    /// Public URL Twilio posts the webhook to; part of the signed payload.
    pub webhook_url: String,
}

#[derive(Debug)]
pub enum ConfigError {
    MissingSessionSecret,
    InvalidSessionSecret(String),
    InvalidPort(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingSessionSecret => {
                write!(f, "SESSION_SECRET environment variable is required")
            }
            ConfigError::InvalidSessionSecret(msg) => {
                write!(f, "Invalid session secret: {}", msg)
            }
            ConfigError::InvalidPort(port) => {
                write!(f, "Invalid port number: {}", port)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("SERVER_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let port = env::var("SERVER_PORT").unwrap_or_else(|_| DEFAULT_PORT.to_string());
        let data_path = env::var("DATABASE_PATH").unwrap_or_else(|_| DEFAULT_DATA_PATH.to_string());

        if port.parse::<u16>().is_err() {
            return Err(ConfigError::InvalidPort(port));
        }

        let session_secret =
            env::var("SESSION_SECRET").map_err(|_| ConfigError::MissingSessionSecret)?;

        if session_secret.as_bytes().len() < MIN_SESSION_SECRET_LENGTH {
            return Err(ConfigError::InvalidSessionSecret(format!(
                "must be at least {} bytes long",
                MIN_SESSION_SECRET_LENGTH
            )));
        }

        let default_currency =
            env::var("DEFAULT_CURRENCY").unwrap_or_else(|_| DEFAULT_CURRENCY.to_string());

        // Empty Twilio credentials put the webhook in permissive dev mode:
        // inbound signatures are not checked and outbound sends are logged only.
        let twilio_account_sid = env::var("TWILIO_ACCOUNT_SID").unwrap_or_default();
        let twilio_auth_token = env::var("TWILIO_AUTH_TOKEN").unwrap_or_default();
        let twilio_whatsapp_from = env::var("TWILIO_WHATSAPP_FROM")
            .unwrap_or_else(|_| "whatsapp:+14155238886".to_string());
        let webhook_url = env::var("WEBHOOK_URL").unwrap_or_default();

        let openai_api_key = env::var("OPENAI_API_KEY").unwrap_or_default();

        Ok(Config {
            host,
            port,
            data_path,
            session_secret,
            default_currency,
            openai_api_key,
            twilio_account_sid,
            twilio_auth_token,
            twilio_whatsapp_from,
            webhook_url,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
