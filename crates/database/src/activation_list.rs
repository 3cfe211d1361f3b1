//! Allow-list lookups.
//!
//! The list itself is maintained out-of-band; the application only ever
//! asks one question of it: does this phone number get free activation?

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{DatabaseError, Result};
use crate::models::ActivationEntry;
use crate::retry::with_backoff;
use crate::validation;

const ENTRY_COLUMNS: &str = "id, phone_number, activated_by, notes, is_active, created_at";

/// The allow-list predicate: present and active.
pub async fn is_phone_allow_listed(pool: &SqlitePool, phone_number: &str) -> Result<bool> {
    let found = with_backoff(|| {
        sqlx::query_scalar::<_, i64>(
            "SELECT 1 FROM activation_list WHERE phone_number = ? AND is_active = 1",
        )
        .bind(phone_number)
        .fetch_optional(pool)
    })
    .await?;
    Ok(found.is_some())
}

/// Add an allow-list entry (administrative path).
pub async fn add_entry(
    pool: &SqlitePool,
    phone_number: &str,
    activated_by: &str,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<ActivationEntry> {
    validation::validate_phone_number(phone_number)?;

    let id = Uuid::new_v4().to_string();
    let query = format!(
        "INSERT INTO activation_list (id, phone_number, activated_by, notes, is_active, created_at) \
         VALUES (?, ?, ?, ?, 1, ?) RETURNING {ENTRY_COLUMNS}"
    );

    sqlx::query_as::<_, ActivationEntry>(&query)
        .bind(&id)
        .bind(phone_number)
        .bind(activated_by)
        .bind(notes)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.is_unique_violation() {
                    return DatabaseError::AlreadyExists {
                        entity: "ActivationEntry",
                        id: phone_number.to_string(),
                    };
                }
            }
            DatabaseError::Sqlx(e)
        })
}

/// List active entries, newest first.
pub async fn list_entries(pool: &SqlitePool, skip: i64, limit: i64) -> Result<Vec<ActivationEntry>> {
    let query = format!(
        "SELECT {ENTRY_COLUMNS} FROM activation_list WHERE is_active = 1 \
         ORDER BY created_at DESC LIMIT ? OFFSET ?"
    );
    let entries = with_backoff(|| {
        sqlx::query_as::<_, ActivationEntry>(&query)
            .bind(limit)
            .bind(skip)
            .fetch_all(pool)
    })
    .await?;
    Ok(entries)
}
