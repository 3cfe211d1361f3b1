//! Entitlement predicates over a [`User`] snapshot.
//!
//! Pure and synchronous; callers read a fresh row and evaluate these on
//! every request rather than caching the outcome. Chat access requires
//! activated + not expired + under quota + account enabled.

use chrono::{DateTime, Utc};

use crate::models::User;

/// A user is activated once both entitlement timestamps are set.
pub fn is_activated(user: &User) -> bool {
    user.activated_at.is_some() && user.expires_at.is_some()
}

/// A user is expired iff an expiry is set and `now` is past it.
pub fn is_expired(user: &User, now: DateTime<Utc>) -> bool {
    matches!(user.expires_at, Some(expires_at) if now > expires_at)
}

/// A user is over quota iff a quota is set and the counter has reached it.
pub fn is_quota_exceeded(user: &User) -> bool {
    user.max_conversations > 0 && user.used_conversations >= user.max_conversations
}

/// Chat turns left before the quota gate closes.
pub fn remaining_conversations(user: &User) -> i64 {
    (user.max_conversations - user.used_conversations).max(0)
}

/// Whether the five reading fields (gender, birth date, birth time, birth
/// place, initial question) are all populated.
pub fn has_complete_fortune_info(user: &User) -> bool {
    !user.gender.is_empty()
        && user.birth_date.is_some()
        && !user.birth_time.is_empty()
        && !user.birth_place.is_empty()
        && !user.initial_question.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn base_user() -> User {
        User {
            id: "u-1".to_string(),
            phone_number: Some("13800138000".to_string()),
            verification_code: None,
            verification_code_expires_at: None,
            name: "测试".to_string(),
            gender: "female".to_string(),
            birth_date: Some(Utc::now() - Duration::days(365 * 30)),
            birth_time: "zi".to_string(),
            birth_place: "杭州".to_string(),
            initial_question: "事业如何".to_string(),
            metadata: None,
            is_active: true,
            activated_at: None,
            expires_at: None,
            max_conversations: 50,
            used_conversations: 0,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn test_is_activated_requires_both_timestamps() {
        let now = Utc::now();
        let mut user = base_user();
        assert!(!is_activated(&user));

        user.activated_at = Some(now);
        assert!(!is_activated(&user));

        user.expires_at = Some(now + Duration::days(7));
        assert!(is_activated(&user));
    }

    #[test]
    fn test_is_expired_boundary() {
        let now = Utc::now();
        let mut user = base_user();

        // No expiry set: never expired.
        assert!(!is_expired(&user, now));

        user.expires_at = Some(now + Duration::seconds(1));
        assert!(!is_expired(&user, now));

        user.expires_at = Some(now - Duration::seconds(1));
        assert!(is_expired(&user, now));

        // Exactly at expiry still counts as current.
        user.expires_at = Some(now);
        assert!(!is_expired(&user, now));
    }

    #[test]
    fn test_quota_exceeded() {
        let mut user = base_user();
        user.max_conversations = 3;

        user.used_conversations = 2;
        assert!(!is_quota_exceeded(&user));
        assert_eq!(remaining_conversations(&user), 1);

        user.used_conversations = 3;
        assert!(is_quota_exceeded(&user));
        assert_eq!(remaining_conversations(&user), 0);

        // Counter past the cap clamps to zero remaining.
        user.used_conversations = 5;
        assert_eq!(remaining_conversations(&user), 0);

        // No quota configured means no gate.
        user.max_conversations = 0;
        assert!(!is_quota_exceeded(&user));
    }

    #[test]
    fn test_has_complete_fortune_info() {
        let mut user = base_user();
        assert!(has_complete_fortune_info(&user));

        user.birth_place = String::new();
        assert!(!has_complete_fortune_info(&user));

        user.birth_place = "杭州".to_string();
        user.birth_date = None;
        assert!(!has_complete_fortune_info(&user));
    }
}
