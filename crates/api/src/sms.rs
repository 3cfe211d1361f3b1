//! SMS delivery for verification codes.
//!
//! The provider is chosen once at startup from the configuration: full
//! Aliyun credentials select the live provider, anything less selects the
//! sandbox, which only logs the code.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::SmsCredentials;

/// SMS delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum SmsError {
    #[error("SMS request failed: {0}")]
    Request(String),

    #[error("SMS vendor rejected the message: {0}")]
    Rejected(String),
}

/// A verification-code sender.
#[async_trait]
pub trait SmsProvider: Send + Sync {
    /// Deliver a verification code to a phone number.
    async fn send_code(&self, phone_number: &str, code: &str) -> Result<(), SmsError>;

    /// Provider name for logging.
    fn name(&self) -> &'static str;
}

/// Aliyun SMS provider.
///
/// Sends the template parameters and credentials as a form POST against
/// the vendor endpoint; a non-OK body code is surfaced as a rejection.
pub struct AliyunSms {
    client: reqwest::Client,
    credentials: SmsCredentials,
}

impl AliyunSms {
    const ENDPOINT: &'static str = "https://dysmsapi.aliyuncs.com/";

    pub fn new(credentials: SmsCredentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            credentials,
        }
    }
}

#[async_trait]
impl SmsProvider for AliyunSms {
    async fn send_code(&self, phone_number: &str, code: &str) -> Result<(), SmsError> {
        let template_param = serde_json::json!({ "code": code }).to_string();
        let params = [
            ("Action", "SendSms"),
            ("PhoneNumbers", phone_number),
            ("SignName", &self.credentials.sign_name),
            ("TemplateCode", &self.credentials.template_code),
            ("TemplateParam", &template_param),
            ("AccessKeyId", &self.credentials.access_key_id),
        ];

        let response = self
            .client
            .post(Self::ENDPOINT)
            .form(&params)
            .send()
            .await
            .map_err(|e| SmsError::Request(e.to_string()))?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SmsError::Request(e.to_string()))?;

        if !status.is_success() || body.get("Code").and_then(|c| c.as_str()) != Some("OK") {
            let message = body
                .get("Message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown vendor error")
                .to_string();
            warn!(phone = %phone_number, %message, "SMS send failed");
            return Err(SmsError::Rejected(message));
        }

        info!(phone = %phone_number, "SMS sent");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "aliyun"
    }
}

/// Sandbox provider: logs the code instead of sending it.
pub struct SandboxSms;

#[async_trait]
impl SmsProvider for SandboxSms {
    async fn send_code(&self, phone_number: &str, code: &str) -> Result<(), SmsError> {
        info!(phone = %phone_number, %code, "Sandbox SMS, code logged instead of sent");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sandbox"
    }
}

/// Select the provider for the given configuration.
pub fn provider_from_config(sms: Option<SmsCredentials>) -> Box<dyn SmsProvider> {
    match sms {
        Some(credentials) => Box::new(AliyunSms::new(credentials)),
        None => {
            warn!("No SMS credentials configured, using sandbox provider");
            Box::new(SandboxSms)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sandbox_provider_always_succeeds() {
        let provider = SandboxSms;
        assert!(provider.send_code("13800138000", "123456").await.is_ok());
        assert_eq!(provider.name(), "sandbox");
    }

    #[test]
    fn missing_credentials_select_sandbox() {
        let provider = provider_from_config(None);
        assert_eq!(provider.name(), "sandbox");
    }
}
