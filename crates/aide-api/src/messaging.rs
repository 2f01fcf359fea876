use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::config::TwilioConfig;

/// Out-of-band delivery to a user's phone.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// `to` is a canonical phone number (digits only).
    async fn send(&self, to: &str, body: &str) -> Result<()>;
}

/// WhatsApp delivery through the Twilio Messages API.
pub struct TwilioMessenger {
    client: reqwest::Client,
    config: TwilioConfig,
}

impl TwilioMessenger {
    pub fn new(client: reqwest::Client, config: TwilioConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Messenger for TwilioMessenger {
    async fn send(&self, to: &str, body: &str) -> Result<()> {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.config.account_sid
        );
        let address = whatsapp_address(to);
        let params = [
            ("To", address.as_str()),
            ("From", self.config.from.as_str()),
            ("Body", body),
        ];

        self.client
            .post(url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&params)
            .send()
            .await?
            .error_for_status()?;

        info!("Message delivered to {}", masked_recipient(to));
        Ok(())
    }
}

/// Development fallback: the message only goes to the log.
pub struct LogMessenger;

#[async_trait]
impl Messenger for LogMessenger {
    async fn send(&self, to: &str, body: &str) -> Result<()> {
        info!("[messaging disabled] to {}: {}", masked_recipient(to), body);
        Ok(())
    }
}

fn whatsapp_address(phone: &str) -> String {
    format!("whatsapp:+{}", phone)
}

/// `+` and the masked canonical digits, for log lines.
fn masked_recipient(phone: &str) -> String {
    format!("+{}", mask_phone(phone))
}

/// Keep only the last four digits for logs.
pub fn mask_phone(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    let visible = digits.len().min(4);
    let tail: String = digits[digits.len() - visible..].iter().collect();
    format!("{}{}", "*".repeat(digits.len() - visible), tail)
}
