//! Input validation for user-supplied fields.
//!
//! Every write path validates its input here before any SQL is issued, so a
//! malformed request never reaches the database.

use std::fmt;

/// Validation error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Phone number is not a mainland mobile number.
    InvalidPhoneNumber(String),
    /// Gender outside the {male, female, ""} set.
    InvalidGender(String),
    /// Birth time outside the twelve pinyin slots.
    InvalidBirthTime(String),
    /// Conversation role outside {user, assistant}.
    InvalidRole(String),
    /// Value too long.
    TooLong { field: String, max: usize, actual: usize },
    /// Empty value where one is required.
    Empty(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidPhoneNumber(phone) => {
                write!(f, "invalid phone number: {}", phone)
            }
            ValidationError::InvalidGender(gender) => write!(f, "invalid gender: {}", gender),
            ValidationError::InvalidBirthTime(slot) => write!(f, "invalid birth time: {}", slot),
            ValidationError::InvalidRole(role) => write!(f, "invalid role: {}", role),
            ValidationError::TooLong { field, max, actual } => {
                write!(f, "{} is too long ({} chars, max {})", field, actual, max)
            }
            ValidationError::Empty(field) => write!(f, "{} cannot be empty", field),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Maximum allowed length for display names.
pub const MAX_NAME_LENGTH: usize = 128;

/// Maximum allowed length for birth places.
pub const MAX_BIRTH_PLACE_LENGTH: usize = 255;

/// Maximum allowed length for the initial question.
pub const MAX_QUESTION_LENGTH: usize = 4096;

/// The twelve traditional two-hour birth slots, in day order.
pub const BIRTH_TIME_SLOTS: [&str; 12] = [
    "zi", "chou", "yin", "mao", "chen", "si", "wu", "wei", "shen", "you", "xu", "hai",
];

/// Validate a mainland mobile number: 11 digits, `1[3-9]` prefix.
pub fn validate_phone_number(phone: &str) -> Result<(), ValidationError> {
    let phone = phone.trim();

    if phone.is_empty() {
        return Err(ValidationError::Empty("phone number".to_string()));
    }

    let mut chars = phone.chars();
    let valid = phone.len() == 11
        && chars.next() == Some('1')
        && matches!(chars.next(), Some('3'..='9'))
        && phone.chars().all(|c| c.is_ascii_digit());

    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidPhoneNumber(phone.to_string()))
    }
}

/// Validate a gender value. Empty is allowed: placeholder rows created at
/// send-code time have no profile yet.
pub fn validate_gender(gender: &str) -> Result<(), ValidationError> {
    match gender {
        "male" | "female" | "" => Ok(()),
        other => Err(ValidationError::InvalidGender(other.to_string())),
    }
}

/// Validate a birth-time slot. Empty is allowed, as for gender.
pub fn validate_birth_time(slot: &str) -> Result<(), ValidationError> {
    if slot.is_empty() || BIRTH_TIME_SLOTS.contains(&slot) {
        Ok(())
    } else {
        Err(ValidationError::InvalidBirthTime(slot.to_string()))
    }
}

/// Validate a conversation role.
pub fn validate_role(role: &str) -> Result<(), ValidationError> {
    match role {
        "user" | "assistant" => Ok(()),
        other => Err(ValidationError::InvalidRole(other.to_string())),
    }
}

/// Validate a bounded text field.
pub fn validate_length(field: &str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.chars().count() > max {
        Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
            actual: value.chars().count(),
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_phone_number_valid() {
        assert!(validate_phone_number("13800138000").is_ok());
        assert!(validate_phone_number("19912345678").is_ok());
        assert!(validate_phone_number(" 13800138000 ").is_ok()); // trimmed
    }

    #[test]
    fn test_validate_phone_number_invalid() {
        // Too short
        assert!(matches!(
            validate_phone_number("12345"),
            Err(ValidationError::InvalidPhoneNumber(_))
        ));

        // Wrong leading digit
        assert!(matches!(
            validate_phone_number("23800000000"),
            Err(ValidationError::InvalidPhoneNumber(_))
        ));

        // Carrier prefix 12x is not assigned to mobile numbers
        assert!(matches!(
            validate_phone_number("12800138000"),
            Err(ValidationError::InvalidPhoneNumber(_))
        ));

        // Non-digits
        assert!(matches!(
            validate_phone_number("1380013800a"),
            Err(ValidationError::InvalidPhoneNumber(_))
        ));

        // Empty
        assert!(matches!(
            validate_phone_number(""),
            Err(ValidationError::Empty(_))
        ));
    }

    #[test]
    fn test_validate_gender() {
        assert!(validate_gender("male").is_ok());
        assert!(validate_gender("female").is_ok());
        assert!(validate_gender("").is_ok());
        assert!(matches!(
            validate_gender("other"),
            Err(ValidationError::InvalidGender(_))
        ));
    }

    #[test]
    fn test_validate_birth_time() {
        for slot in BIRTH_TIME_SLOTS {
            assert!(validate_birth_time(slot).is_ok());
        }
        assert!(validate_birth_time("").is_ok());
        assert!(matches!(
            validate_birth_time("midnight"),
            Err(ValidationError::InvalidBirthTime(_))
        ));
    }

    #[test]
    fn test_validate_role() {
        assert!(validate_role("user").is_ok());
        assert!(validate_role("assistant").is_ok());
        assert!(matches!(
            validate_role("system"),
            Err(ValidationError::InvalidRole(_))
        ));
    }

    #[test]
    fn test_validate_length() {
        assert!(validate_length("name", "甲乙丙", 3).is_ok());
        assert!(matches!(
            validate_length("name", "甲乙丙丁", 3),
            Err(ValidationError::TooLong { .. })
        ));
    }
}
