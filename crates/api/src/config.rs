//! Configuration loaded from environment variables.

use std::env;
use std::net::SocketAddr;

/// Aliyun SMS credentials. All four variables must be present for the
/// live provider to be selected.
#[derive(Debug, Clone)]
pub struct SmsCredentials {
    pub access_key_id: String,
    pub access_key_secret: String,
    pub sign_name: String,
    pub template_code: String,
}

/// Alipay merchant credentials.
#[derive(Debug, Clone)]
pub struct AlipayCredentials {
    pub app_id: String,
    pub secret: String,
}

/// WeChat Pay merchant credentials.
#[derive(Debug, Clone)]
pub struct WechatCredentials {
    pub mch_id: String,
    pub api_key: String,
}

/// API server configuration.
///
/// Provider selection happens here, once, at startup: a missing
/// credential set means the sandbox provider for that concern, never a
/// per-request fallback.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address.
    pub addr: SocketAddr,
    /// SQLite database URL.
    pub database_url: String,
    /// Secret for HMAC-signing session cookies.
    pub session_secret: String,
    /// Admin panel password.
    pub admin_password: String,
    /// Public base URL used in payment return/notify URLs.
    pub base_url: String,
    /// Echo verification codes in the send-code response (demo only).
    pub show_verification_code: bool,
    /// Aliyun SMS credentials; `None` selects the sandbox SMS provider.
    pub sms: Option<SmsCredentials>,
    /// Alipay credentials; `None` selects the sandbox gateway.
    pub alipay: Option<AlipayCredentials>,
    /// WeChat Pay credentials; `None` selects the sandbox gateway.
    pub wechat: Option<WechatCredentials>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `API_ADDR` | Server bind address | `127.0.0.1:5000` |
    /// | `DATABASE_URL` | SQLite database URL | `sqlite:tianji.db?mode=rwc` |
    /// | `SESSION_SECRET` | Cookie signing secret | (required) |
    /// | `ADMIN_PASSWORD` | Admin panel password | (required) |
    /// | `BASE_URL` | Public base URL | `http://localhost:5000` |
    /// | `SHOW_VERIFICATION_CODE` | Echo codes in responses | `false` |
    /// | `SMS_ACCESS_KEY_ID` etc. | Aliyun SMS credentials | (sandbox) |
    /// | `ALIPAY_APP_ID`, `ALIPAY_SECRET` | Alipay credentials | (sandbox) |
    /// | `WECHAT_PAY_MCH_ID`, `WECHAT_PAY_API_KEY` | WeChat credentials | (sandbox) |
    pub fn from_env() -> Result<Self, ConfigError> {
        let addr = env::var("API_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:5000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidAddr)?;

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:tianji.db?mode=rwc".to_string());

        let session_secret =
            env::var("SESSION_SECRET").map_err(|_| ConfigError::MissingSessionSecret)?;

        let admin_password =
            env::var("ADMIN_PASSWORD").map_err(|_| ConfigError::MissingAdminPassword)?;

        let base_url =
            env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:5000".to_string());

        let show_verification_code = env::var("SHOW_VERIFICATION_CODE")
            .map(|v| v == "true")
            .unwrap_or(false);

        let sms = match (
            env::var("SMS_ACCESS_KEY_ID"),
            env::var("SMS_ACCESS_KEY_SECRET"),
            env::var("SMS_SIGN_NAME"),
            env::var("SMS_TEMPLATE_CODE"),
        ) {
            (Ok(access_key_id), Ok(access_key_secret), Ok(sign_name), Ok(template_code)) => {
                Some(SmsCredentials {
                    access_key_id,
                    access_key_secret,
                    sign_name,
                    template_code,
                })
            }
            _ => None,
        };

        let alipay = match (env::var("ALIPAY_APP_ID"), env::var("ALIPAY_SECRET")) {
            (Ok(app_id), Ok(secret)) => Some(AlipayCredentials { app_id, secret }),
            _ => None,
        };

        let wechat = match (env::var("WECHAT_PAY_MCH_ID"), env::var("WECHAT_PAY_API_KEY")) {
            (Ok(mch_id), Ok(api_key)) => Some(WechatCredentials { mch_id, api_key }),
            _ => None,
        };

        Ok(Self {
            addr,
            database_url,
            session_secret,
            admin_password,
            base_url,
            show_verification_code,
            sms,
            alipay,
            wechat,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid API_ADDR format")]
    InvalidAddr,

    #[error("SESSION_SECRET environment variable is required")]
    MissingSessionSecret,

    #[error("ADMIN_PASSWORD environment variable is required")]
    MissingAdminPassword,
}
