//! User CRUD and lifecycle operations.
//!
//! All time-sensitive operations take `now` from the caller so login-code
//! expiry and entitlement windows can be tested without a real clock.

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{DatabaseError, Result};
use crate::models::User;
use crate::retry::with_backoff;
use crate::validation::{
    self, MAX_BIRTH_PLACE_LENGTH, MAX_NAME_LENGTH, MAX_QUESTION_LENGTH, ValidationError,
};

const USER_COLUMNS: &str = "id, phone_number, verification_code, verification_code_expires_at, \
     name, gender, birth_date, birth_time, birth_place, initial_question, metadata, \
     is_active, activated_at, expires_at, max_conversations, used_conversations, \
     created_at, updated_at";

/// Validated input shape for creating a user.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub phone_number: Option<String>,
    pub name: String,
    pub gender: String,
    pub birth_date: Option<DateTime<Utc>>,
    pub birth_time: String,
    pub birth_place: String,
    pub initial_question: String,
    pub metadata: Option<String>,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<DateTime<Utc>>,
    pub birth_time: Option<String>,
    pub birth_place: Option<String>,
    pub initial_question: Option<String>,
    pub metadata: Option<String>,
    pub phone_number: Option<String>,
    pub is_active: Option<bool>,
}

impl UserUpdate {
    /// Whether any field is set.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.gender.is_none()
            && self.birth_date.is_none()
            && self.birth_time.is_none()
            && self.birth_place.is_none()
            && self.initial_question.is_none()
            && self.metadata.is_none()
            && self.phone_number.is_none()
            && self.is_active.is_none()
    }
}

/// Pagination and filters for [`list_users`]. Filters are exact-match only.
#[derive(Debug, Clone)]
pub struct ListUsers {
    pub skip: i64,
    pub limit: i64,
    pub is_active: Option<bool>,
}

impl Default for ListUsers {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: 100,
            is_active: None,
        }
    }
}

fn validate_new_user(user: &NewUser) -> std::result::Result<(), ValidationError> {
    if let Some(phone) = &user.phone_number {
        validation::validate_phone_number(phone)?;
    }
    validation::validate_gender(&user.gender)?;
    validation::validate_birth_time(&user.birth_time)?;
    validation::validate_length("name", &user.name, MAX_NAME_LENGTH)?;
    validation::validate_length("birth place", &user.birth_place, MAX_BIRTH_PLACE_LENGTH)?;
    validation::validate_length(
        "initial question",
        &user.initial_question,
        MAX_QUESTION_LENGTH,
    )?;
    Ok(())
}

fn validate_update(update: &UserUpdate) -> std::result::Result<(), ValidationError> {
    if update.is_empty() {
        return Err(ValidationError::Empty("update".to_string()));
    }
    if let Some(phone) = &update.phone_number {
        validation::validate_phone_number(phone)?;
    }
    if let Some(gender) = &update.gender {
        validation::validate_gender(gender)?;
    }
    if let Some(slot) = &update.birth_time {
        validation::validate_birth_time(slot)?;
    }
    if let Some(name) = &update.name {
        validation::validate_length("name", name, MAX_NAME_LENGTH)?;
    }
    if let Some(place) = &update.birth_place {
        validation::validate_length("birth place", place, MAX_BIRTH_PLACE_LENGTH)?;
    }
    if let Some(question) = &update.initial_question {
        validation::validate_length("initial question", question, MAX_QUESTION_LENGTH)?;
    }
    Ok(())
}

fn map_unique_violation(err: sqlx::Error, phone: &str) -> DatabaseError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.is_unique_violation() {
            return DatabaseError::AlreadyExists {
                entity: "User",
                id: phone.to_string(),
            };
        }
    }
    DatabaseError::Sqlx(err)
}

/// Create a new user from a validated profile.
pub async fn create_user(pool: &SqlitePool, user: &NewUser, now: DateTime<Utc>) -> Result<User> {
    validate_new_user(user)?;

    let id = Uuid::new_v4().to_string();
    let query = format!(
        "INSERT INTO users (id, phone_number, name, gender, birth_date, birth_time, \
         birth_place, initial_question, metadata, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         RETURNING {USER_COLUMNS}"
    );

    sqlx::query_as::<_, User>(&query)
        .bind(&id)
        .bind(&user.phone_number)
        .bind(&user.name)
        .bind(&user.gender)
        .bind(user.birth_date)
        .bind(&user.birth_time)
        .bind(&user.birth_place)
        .bind(&user.initial_question)
        .bind(&user.metadata)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(|e| map_unique_violation(e, user.phone_number.as_deref().unwrap_or("")))
}

/// Create a placeholder row carrying only an identity. Used by send-code
/// when the phone number has never been seen.
pub async fn create_placeholder(
    pool: &SqlitePool,
    phone_number: &str,
    now: DateTime<Utc>,
) -> Result<User> {
    validation::validate_phone_number(phone_number)?;

    let id = Uuid::new_v4().to_string();
    let query = format!(
        "INSERT INTO users (id, phone_number, created_at) VALUES (?, ?, ?) \
         RETURNING {USER_COLUMNS}"
    );

    sqlx::query_as::<_, User>(&query)
        .bind(&id)
        .bind(phone_number)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(|e| map_unique_violation(e, phone_number))
}

/// Get a user by ID. Absence is a valid outcome.
pub async fn get_user(pool: &SqlitePool, id: &str) -> Result<Option<User>> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
    let user = with_backoff(|| {
        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(pool)
    })
    .await?;
    Ok(user)
}

/// Get a user by phone number.
pub async fn get_user_by_phone(pool: &SqlitePool, phone_number: &str) -> Result<Option<User>> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE phone_number = ?");
    let user = with_backoff(|| {
        sqlx::query_as::<_, User>(&query)
            .bind(phone_number)
            .fetch_optional(pool)
    })
    .await?;
    Ok(user)
}

/// List users, newest first.
pub async fn list_users(pool: &SqlitePool, opts: &ListUsers) -> Result<Vec<User>> {
    let users = match opts.is_active {
        Some(is_active) => {
            let query = format!(
                "SELECT {USER_COLUMNS} FROM users WHERE is_active = ? \
                 ORDER BY created_at DESC LIMIT ? OFFSET ?"
            );
            with_backoff(|| {
                sqlx::query_as::<_, User>(&query)
                    .bind(is_active)
                    .bind(opts.limit)
                    .bind(opts.skip)
                    .fetch_all(pool)
            })
            .await?
        }
        None => {
            let query = format!(
                "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC LIMIT ? OFFSET ?"
            );
            with_backoff(|| {
                sqlx::query_as::<_, User>(&query)
                    .bind(opts.limit)
                    .bind(opts.skip)
                    .fetch_all(pool)
            })
            .await?
        }
    };
    Ok(users)
}

/// Count total users.
pub async fn count_users(pool: &SqlitePool) -> Result<i64> {
    let count = with_backoff(|| {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users").fetch_one(pool)
    })
    .await?;
    Ok(count)
}

/// Apply a partial update and return the fresh row, or `None` if the user
/// does not exist.
pub async fn update_user(
    pool: &SqlitePool,
    id: &str,
    update: &UserUpdate,
    now: DateTime<Utc>,
) -> Result<Option<User>> {
    validate_update(update)?;

    let mut sets: Vec<&'static str> = Vec::new();
    if update.name.is_some() {
        sets.push("name = ?");
    }
    if update.gender.is_some() {
        sets.push("gender = ?");
    }
    if update.birth_date.is_some() {
        sets.push("birth_date = ?");
    }
    if update.birth_time.is_some() {
        sets.push("birth_time = ?");
    }
    if update.birth_place.is_some() {
        sets.push("birth_place = ?");
    }
    if update.initial_question.is_some() {
        sets.push("initial_question = ?");
    }
    if update.metadata.is_some() {
        sets.push("metadata = ?");
    }
    if update.phone_number.is_some() {
        sets.push("phone_number = ?");
    }
    if update.is_active.is_some() {
        sets.push("is_active = ?");
    }

    let query = format!(
        "UPDATE users SET {}, updated_at = ? WHERE id = ? RETURNING {USER_COLUMNS}",
        sets.join(", ")
    );

    // Bind order must match the push order above.
    let mut q = sqlx::query_as::<_, User>(&query);
    if let Some(name) = &update.name {
        q = q.bind(name);
    }
    if let Some(gender) = &update.gender {
        q = q.bind(gender);
    }
    if let Some(birth_date) = update.birth_date {
        q = q.bind(birth_date);
    }
    if let Some(birth_time) = &update.birth_time {
        q = q.bind(birth_time);
    }
    if let Some(birth_place) = &update.birth_place {
        q = q.bind(birth_place);
    }
    if let Some(question) = &update.initial_question {
        q = q.bind(question);
    }
    if let Some(metadata) = &update.metadata {
        q = q.bind(metadata);
    }
    if let Some(phone) = &update.phone_number {
        q = q.bind(phone);
    }
    if let Some(is_active) = update.is_active {
        q = q.bind(is_active);
    }

    let user = q
        .bind(now)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| map_unique_violation(e, update.phone_number.as_deref().unwrap_or("")))?;
    Ok(user)
}

/// Store a pending login code with its expiry. Returns false when the
/// phone number is unknown.
pub async fn save_verification_code(
    pool: &SqlitePool,
    phone_number: &str,
    code: &str,
    expires_in_secs: i64,
    now: DateTime<Utc>,
) -> Result<bool> {
    let expires_at = now + Duration::seconds(expires_in_secs);
    let result = with_backoff(|| {
        sqlx::query(
            "UPDATE users SET verification_code = ?, verification_code_expires_at = ?, \
             updated_at = ? WHERE phone_number = ?",
        )
        .bind(code)
        .bind(expires_at)
        .bind(now)
        .bind(phone_number)
        .execute(pool)
    })
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Whether the phone number has this exact code pending and unexpired.
pub async fn verify_code(
    pool: &SqlitePool,
    phone_number: &str,
    code: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let found = with_backoff(|| {
        sqlx::query_scalar::<_, i64>(
            "SELECT 1 FROM users WHERE phone_number = ? AND verification_code = ? \
             AND verification_code_expires_at > ?",
        )
        .bind(phone_number)
        .bind(code)
        .bind(now)
        .fetch_optional(pool)
    })
    .await?;
    Ok(found.is_some())
}

/// Clear the pending login code so it cannot be replayed.
pub async fn clear_verification_code(
    pool: &SqlitePool,
    phone_number: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    with_backoff(|| {
        sqlx::query(
            "UPDATE users SET verification_code = NULL, \
             verification_code_expires_at = NULL, updated_at = ? WHERE phone_number = ?",
        )
        .bind(now)
        .bind(phone_number)
        .execute(pool)
    })
    .await?;
    Ok(())
}

/// Grant an entitlement: `valid_days` of access with a fresh quota. The
/// used counter restarts so the grant is worth its full quota.
pub async fn activate_user(
    pool: &SqlitePool,
    id: &str,
    valid_days: i64,
    max_conversations: i64,
    now: DateTime<Utc>,
) -> Result<Option<User>> {
    let expires_at = now + Duration::days(valid_days);
    let query = format!(
        "UPDATE users SET activated_at = ?, expires_at = ?, max_conversations = ?, \
         used_conversations = 0, updated_at = ? WHERE id = ? RETURNING {USER_COLUMNS}"
    );

    let user = with_backoff(|| {
        sqlx::query_as::<_, User>(&query)
            .bind(now)
            .bind(expires_at)
            .bind(max_conversations)
            .bind(now)
            .bind(id)
            .fetch_optional(pool)
    })
    .await?;
    Ok(user)
}

/// Consume one chat turn. A single atomic statement, so concurrent turns
/// cannot lose an increment. Returns the new counter value.
pub async fn increment_used_conversations(
    pool: &SqlitePool,
    id: &str,
    now: DateTime<Utc>,
) -> Result<i64> {
    let used = with_backoff(|| {
        sqlx::query_scalar::<_, i64>(
            "UPDATE users SET used_conversations = used_conversations + 1, updated_at = ? \
             WHERE id = ? RETURNING used_conversations",
        )
        .bind(now)
        .bind(id)
        .fetch_optional(pool)
    })
    .await?;

    used.ok_or_else(|| DatabaseError::NotFound {
        entity: "User",
        id: id.to_string(),
    })
}

/// Create a user and grant the allow-list entitlement in one transaction,
/// so a crash can never leave a created-but-unactivated account behind.
pub async fn create_activated_user(
    pool: &SqlitePool,
    phone_number: &str,
    valid_days: i64,
    max_conversations: i64,
    now: DateTime<Utc>,
) -> Result<User> {
    validation::validate_phone_number(phone_number)?;

    let id = Uuid::new_v4().to_string();
    let expires_at = now + Duration::days(valid_days);

    let mut tx = pool.begin().await?;

    sqlx::query("INSERT INTO users (id, phone_number, created_at) VALUES (?, ?, ?)")
        .bind(&id)
        .bind(phone_number)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, phone_number))?;

    let query = format!(
        "UPDATE users SET activated_at = ?, expires_at = ?, max_conversations = ?, \
         updated_at = ? WHERE id = ? RETURNING {USER_COLUMNS}"
    );
    let user = sqlx::query_as::<_, User>(&query)
        .bind(now)
        .bind(expires_at)
        .bind(max_conversations)
        .bind(now)
        .bind(&id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(user)
}
