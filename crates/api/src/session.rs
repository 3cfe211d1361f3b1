//! HMAC-signed session cookies.
//!
//! Cookie values carry `subject:expiry.base64url_signature`, where the
//! signature is HMAC-SHA256 over `subject:expiry` with the server's
//! session secret. A cookie that fails verification or has lapsed is
//! treated the same as no cookie at all.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use cookie::{Cookie, SameSite};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Cookie name for user sessions.
pub const USER_COOKIE: &str = "user_id";
/// Cookie name for admin sessions.
pub const ADMIN_COOKIE: &str = "admin_token";
/// Subject embedded in admin cookies.
pub const ADMIN_SUBJECT: &str = "admin";

const USER_TTL_DAYS: i64 = 7;
const ADMIN_TTL_HOURS: i64 = 24;

/// The verified subject of a user session cookie, inserted into request
/// extensions by the guard middleware. Handlers that act on a
/// client-supplied user id compare it against this.
#[derive(Debug, Clone)]
pub struct SessionUser(pub String);

fn compute_signature(payload: &str, secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());
    URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
}

/// Sign a subject with an absolute expiry, producing the cookie value.
pub fn sign(subject: &str, expires_at: DateTime<Utc>, secret: &str) -> String {
    let payload = format!("{}:{}", subject, expires_at.timestamp());
    let signature = compute_signature(&payload, secret);
    format!("{}.{}", payload, signature)
}

/// Verify a cookie value and extract its subject.
///
/// Returns `None` on a bad signature, a malformed payload, or an expired
/// session. Signature comparison is constant-time.
pub fn verify(value: &str, secret: &str, now: DateTime<Utc>) -> Option<String> {
    let (payload, signature) = value.rsplit_once('.')?;
    if payload.is_empty() || signature.is_empty() {
        return None;
    }

    let expected = compute_signature(payload, secret);
    if signature.len() != expected.len() {
        return None;
    }
    let diff = signature
        .as_bytes()
        .iter()
        .zip(expected.as_bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));
    if diff != 0 {
        return None;
    }

    let (subject, expiry) = payload.rsplit_once(':')?;
    let expiry: i64 = expiry.parse().ok()?;
    if expiry <= now.timestamp() || subject.is_empty() {
        return None;
    }

    Some(subject.to_string())
}

fn build_cookie(name: &str, value: String, max_age_secs: i64) -> String {
    Cookie::build((name.to_string(), value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(cookie::time::Duration::seconds(max_age_secs))
        .build()
        .to_string()
}

/// Build the Set-Cookie value for a logged-in user (7 days).
pub fn issue_user_cookie(user_id: &str, secret: &str, now: DateTime<Utc>) -> String {
    let expires_at = now + Duration::days(USER_TTL_DAYS);
    build_cookie(
        USER_COOKIE,
        sign(user_id, expires_at, secret),
        USER_TTL_DAYS * 24 * 60 * 60,
    )
}

/// Build the Set-Cookie value for a logged-in admin (24 hours).
pub fn issue_admin_cookie(secret: &str, now: DateTime<Utc>) -> String {
    let expires_at = now + Duration::hours(ADMIN_TTL_HOURS);
    build_cookie(
        ADMIN_COOKIE,
        sign(ADMIN_SUBJECT, expires_at, secret),
        ADMIN_TTL_HOURS * 60 * 60,
    )
}

/// Pull a named cookie out of a Cookie request header.
pub fn cookie_value(headers: &axum::http::HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    for part in header.split(';') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix(&format!("{}=", name)) {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Verified subject of a named session cookie, if any.
pub fn verified_subject(
    headers: &axum::http::HeaderMap,
    name: &str,
    secret: &str,
    now: DateTime<Utc>,
) -> Option<String> {
    let value = cookie_value(headers, name)?;
    verify(&value, secret, now)
}
