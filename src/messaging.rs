use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::collections::BTreeMap;
use std::time::Duration;

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";
const SEND_TIMEOUT_SECS: u64 = 15;
const DOWNLOAD_TIMEOUT_SECS: u64 = 30;

type HmacSha1 = Hmac<Sha1>;

/// Outbound chat capability. `send` is best-effort: a delivery failure is
/// logged and swallowed, never surfaced to the caller, because the webhook
/// has already been acknowledged by then.
#[async_trait]
pub trait MessagingProvider: Send + Sync {
    async fn send(&self, to: &str, body: &str);

    async fn download_media(&self, url: &str) -> anyhow::Result<Vec<u8>>;
}

/// Checks a webhook payload against the provider's signature scheme:
/// HMAC-SHA1 over the full callback URL followed by every form field,
/// alphabetically sorted and concatenated as `key` + `value`, base64 encoded.
pub fn verify_signature(
    auth_token: &str,
    url: &str,
    params: &BTreeMap<String, String>,
    signature: &str,
) -> bool {
    let mut payload = url.to_string();
    for (key, value) in params {
        payload.push_str(key);
        payload.push_str(value);
    }

    let Ok(mut mac) = HmacSha1::new_from_slice(auth_token.as_bytes()) else {
        return false;
    };
    mac.update(payload.as_bytes());

    let Ok(provided) = base64::engine::general_purpose::STANDARD.decode(signature) else {
        return false;
    };
    mac.verify_slice(&provided).is_ok()
}

pub struct TwilioProvider {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from: String,
}

impl TwilioProvider {
    pub fn new(account_sid: String, auth_token: String, from: String) -> TwilioProvider {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .build()
            .expect("failed to build HTTP client");
        TwilioProvider {
            client,
            account_sid,
            auth_token,
            from,
        }
    }

    fn is_configured(&self) -> bool {
        !self.account_sid.is_empty() && !self.auth_token.is_empty()
    }
}

#[async_trait]
impl MessagingProvider for TwilioProvider {
    async fn send(&self, to: &str, body: &str) {
        if !self.is_configured() {
            log::warn!("Twilio not configured, message to {} not sent", to);
            return;
        }

        let url = format!(
            "{}/Accounts/{}/Messages.json",
            TWILIO_API_BASE, self.account_sid
        );
        let params = [("From", self.from.as_str()), ("To", to), ("Body", body)];

        let result = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                log::info!("message sent to {} ({} chars)", to, body.len());
            }
            Ok(response) => {
                log::error!("Twilio send failed with status {}", response.status());
            }
            Err(e) => {
                log::error!("Twilio send failed: {}", e);
            }
        }
    }

    async fn download_media(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}
