//! Payment plans, gateways, and callback verification.
//!
//! One gateway per payment method, chosen at startup: configured
//! credentials select the live gateway, otherwise the sandbox, whose pay
//! URL points at the local mock payment page.
//!
//! Callback notifications carry a `sign` parameter: HMAC-SHA256 over the
//! remaining parameters sorted by key and joined as `k=v&k=v`, encoded
//! base64url. The sandbox gateway signs with a fixed secret so the
//! round trip is exercised end to end even without vendor credentials.

use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::Rng;

use crate::config::{AlipayCredentials, Config, WechatCredentials};

/// A purchasable entitlement plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub id: &'static str,
    pub name: &'static str,
    /// Price in fen (1/100 yuan).
    pub amount_cents: i64,
    /// Entitlement duration in days.
    pub valid_days: i64,
    /// Chat-turn quota granted.
    pub max_conversations: i64,
}

/// The fixed plan table.
pub const PLANS: &[Plan] = &[
    Plan {
        id: "weekly",
        name: "体验套餐",
        amount_cents: 1990,
        valid_days: 7,
        max_conversations: 100,
    },
    Plan {
        id: "yearly",
        name: "年度尊享",
        amount_cents: 6900,
        valid_days: 365,
        max_conversations: 1000,
    },
];

/// Look up a plan by id.
pub fn plan(id: &str) -> Option<&'static Plan> {
    PLANS.iter().find(|p| p.id == id)
}

/// Generate a new order number: `TJG` + millisecond timestamp + 7 random
/// uppercase alphanumerics.
pub fn new_order_number(now: DateTime<Utc>) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..7)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("TJG{}{}", now.timestamp_millis(), suffix)
}

/// Payment errors.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Unsupported payment method: {0}")]
    UnknownMethod(String),

    #[error("Missing callback parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid callback signature")]
    BadSignature,
}

/// A verified callback notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackNotice {
    pub order_id: String,
    pub succeeded: bool,
}

/// A payment gateway for one method.
pub enum Gateway {
    /// No vendor credentials; pay URLs point at the local mock page and
    /// callbacks are signed with [`Gateway::SANDBOX_SECRET`].
    Sandbox,
    Alipay(AlipayCredentials),
    Wechat(WechatCredentials),
}

impl Gateway {
    /// Signing secret used by the sandbox gateway.
    pub const SANDBOX_SECRET: &'static str = "sandbox";

    fn secret(&self) -> &str {
        match self {
            Gateway::Sandbox => Self::SANDBOX_SECRET,
            Gateway::Alipay(creds) => &creds.secret,
            Gateway::Wechat(creds) => &creds.api_key,
        }
    }

    /// Build the URL the client is redirected to for payment.
    pub fn pay_url(&self, method: &str, order_id: &str, plan: &Plan, base_url: &str) -> String {
        match self {
            Gateway::Sandbox => format!(
                "{}/api/payment/mock?orderId={}&method={}",
                base_url,
                urlencoding::encode(order_id),
                method
            ),
            Gateway::Alipay(creds) => {
                let mut params: HashMap<String, String> = HashMap::from([
                    ("app_id".to_string(), creds.app_id.clone()),
                    ("out_trade_no".to_string(), order_id.to_string()),
                    ("subject".to_string(), plan.name.to_string()),
                    ("total_amount".to_string(), format_yuan(plan.amount_cents)),
                    (
                        "return_url".to_string(),
                        format!("{}/purchase/success?orderId={}", base_url, order_id),
                    ),
                    (
                        "notify_url".to_string(),
                        format!("{}/api/payment/callback/alipay", base_url),
                    ),
                ]);
                let sign = sign_params(&params, &creds.secret);
                params.insert("sign".to_string(), sign);
                format!("https://openapi.alipay.com/gateway.do?{}", query_string(&params))
            }
            Gateway::Wechat(creds) => {
                let mut params: HashMap<String, String> = HashMap::from([
                    ("mch_id".to_string(), creds.mch_id.clone()),
                    ("out_trade_no".to_string(), order_id.to_string()),
                    ("description".to_string(), plan.name.to_string()),
                    ("total_fee".to_string(), plan.amount_cents.to_string()),
                    (
                        "notify_url".to_string(),
                        format!("{}/api/payment/callback/wechat", base_url),
                    ),
                ]);
                let sign = sign_params(&params, &creds.api_key);
                params.insert("sign".to_string(), sign);
                format!("https://h5.wechatpay.cn/pay?{}", query_string(&params))
            }
        }
    }

    /// Verify a callback notification and extract the order outcome.
    ///
    /// Expects `order_id`, `trade_status` (`SUCCESS` or anything else),
    /// and `sign` over the rest of the parameters.
    pub fn verify_callback(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<CallbackNotice, PaymentError> {
        let signature = params
            .get("sign")
            .ok_or(PaymentError::MissingParameter("sign"))?;
        let order_id = params
            .get("order_id")
            .ok_or(PaymentError::MissingParameter("order_id"))?;
        let trade_status = params
            .get("trade_status")
            .ok_or(PaymentError::MissingParameter("trade_status"))?;

        let expected = sign_params(params, self.secret());
        if !constant_time_eq(signature, &expected) {
            return Err(PaymentError::BadSignature);
        }

        Ok(CallbackNotice {
            order_id: order_id.clone(),
            succeeded: trade_status == "SUCCESS",
        })
    }
}

/// The per-method gateways for this deployment.
pub struct Gateways {
    alipay: Gateway,
    wechat: Gateway,
}

impl Gateways {
    /// Select gateways from the configuration, once.
    pub fn from_config(config: &Config) -> Self {
        let alipay = match &config.alipay {
            Some(creds) => Gateway::Alipay(creds.clone()),
            None => {
                tracing::warn!("No Alipay credentials configured, using sandbox gateway");
                Gateway::Sandbox
            }
        };
        let wechat = match &config.wechat {
            Some(creds) => Gateway::Wechat(creds.clone()),
            None => {
                tracing::warn!("No WeChat Pay credentials configured, using sandbox gateway");
                Gateway::Sandbox
            }
        };
        Self { alipay, wechat }
    }

    /// Gateway for a payment method name.
    pub fn for_method(&self, method: &str) -> Result<&Gateway, PaymentError> {
        match method {
            "alipay" => Ok(&self.alipay),
            "wechat" => Ok(&self.wechat),
            other => Err(PaymentError::UnknownMethod(other.to_string())),
        }
    }
}

/// Sign parameters: sort by key, join `k=v` with `&` (skipping `sign`),
/// HMAC-SHA256 with the gateway secret, base64url.
pub fn sign_params(params: &HashMap<String, String>, secret: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let mut keys: Vec<&String> = params.keys().filter(|k| k.as_str() != "sign").collect();
    keys.sort();
    let canonical = keys
        .iter()
        .map(|k| format!("{}={}", k, params[*k]))
        .collect::<Vec<_>>()
        .join("&");

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(canonical.as_bytes());
    URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

fn format_yuan(cents: i64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}

/// Build a sorted, percent-encoded query string. The signature is
/// computed over the raw values; only the URL form is encoded.
fn query_string(params: &HashMap<String, String>) -> String {
    let mut keys: Vec<&String> = params.keys().collect();
    keys.sort();
    keys.iter()
        .map(|k| format!("{}={}", k, urlencoding::encode(&params[*k])))
        .collect::<Vec<_>>()
        .join("&")
}
