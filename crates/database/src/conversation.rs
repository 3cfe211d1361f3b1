//! Conversation history operations.
//!
//! Two read orders exist on purpose: context assembly wants the turns
//! oldest-first so the model sees the dialogue in sequence, while the
//! history screen wants newest-first.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::Result;
use crate::models::Conversation;
use crate::retry::with_backoff;
use crate::validation;

const CONVERSATION_COLUMNS: &str = "id, user_id, role, content, is_on_topic, created_at";

/// Validated input shape for persisting a chat turn.
#[derive(Debug, Clone)]
pub struct NewConversation {
    pub user_id: String,
    pub role: String,
    pub content: String,
    pub is_on_topic: bool,
}

/// Pagination and filters for [`list_for_display`].
#[derive(Debug, Clone)]
pub struct ListConversations {
    pub skip: i64,
    pub limit: i64,
    pub role: Option<String>,
}

impl Default for ListConversations {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: 50,
            role: None,
        }
    }
}

/// A turn reduced to what the upstream model needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextTurn {
    pub role: String,
    pub content: String,
}

/// Persist one chat turn.
pub async fn create_conversation(
    pool: &SqlitePool,
    turn: &NewConversation,
    now: DateTime<Utc>,
) -> Result<Conversation> {
    validation::validate_role(&turn.role)?;
    if turn.content.is_empty() {
        return Err(validation::ValidationError::Empty("content".to_string()).into());
    }

    let id = Uuid::new_v4().to_string();
    let query = format!(
        "INSERT INTO conversations (id, user_id, role, content, is_on_topic, created_at) \
         VALUES (?, ?, ?, ?, ?, ?) RETURNING {CONVERSATION_COLUMNS}"
    );

    let conversation = with_backoff(|| {
        sqlx::query_as::<_, Conversation>(&query)
            .bind(&id)
            .bind(&turn.user_id)
            .bind(&turn.role)
            .bind(&turn.content)
            .bind(turn.is_on_topic)
            .bind(now)
            .fetch_one(pool)
    })
    .await?;
    Ok(conversation)
}

/// List a user's turns newest-first for display.
pub async fn list_for_display(
    pool: &SqlitePool,
    user_id: &str,
    opts: &ListConversations,
) -> Result<Vec<Conversation>> {
    let conversations = match &opts.role {
        Some(role) => {
            validation::validate_role(role)?;
            let query = format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations \
                 WHERE user_id = ? AND role = ? \
                 ORDER BY created_at DESC LIMIT ? OFFSET ?"
            );
            with_backoff(|| {
                sqlx::query_as::<_, Conversation>(&query)
                    .bind(user_id)
                    .bind(role)
                    .bind(opts.limit)
                    .bind(opts.skip)
                    .fetch_all(pool)
            })
            .await?
        }
        None => {
            let query = format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE user_id = ? \
                 ORDER BY created_at DESC LIMIT ? OFFSET ?"
            );
            with_backoff(|| {
                sqlx::query_as::<_, Conversation>(&query)
                    .bind(user_id)
                    .bind(opts.limit)
                    .bind(opts.skip)
                    .fetch_all(pool)
            })
            .await?
        }
    };
    Ok(conversations)
}

/// Load up to `limit` turns oldest-first as upstream context.
pub async fn history_for_context(
    pool: &SqlitePool,
    user_id: &str,
    limit: i64,
) -> Result<Vec<ContextTurn>> {
    let query = format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE user_id = ? \
         ORDER BY created_at ASC LIMIT ?"
    );
    let rows = with_backoff(|| {
        sqlx::query_as::<_, Conversation>(&query)
            .bind(user_id)
            .bind(limit)
            .fetch_all(pool)
    })
    .await?;

    Ok(rows
        .into_iter()
        .map(|turn| ContextTurn {
            role: turn.role,
            content: turn.content,
        })
        .collect())
}

/// Delete every turn belonging to a user. Returns the number removed.
pub async fn delete_all_for_user(pool: &SqlitePool, user_id: &str) -> Result<u64> {
    let result = with_backoff(|| {
        sqlx::query("DELETE FROM conversations WHERE user_id = ?")
            .bind(user_id)
            .execute(pool)
    })
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DatabaseError;
    use crate::user;
    use crate::Database;
    use chrono::Duration;

    async fn test_db_with_user() -> (Database, String) {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let user = user::create_placeholder(db.pool(), "13800138000", Utc::now())
            .await
            .unwrap();
        (db, user.id)
    }

    async fn seed_turn(db: &Database, user_id: &str, role: &str, content: &str, at: DateTime<Utc>) {
        create_conversation(
            db.pool(),
            &NewConversation {
                user_id: user_id.to_string(),
                role: role.to_string(),
                content: content.to_string(),
                is_on_topic: true,
            },
            at,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_context_ascending_display_descending() {
        let (db, user_id) = test_db_with_user().await;
        let t0 = Utc::now();

        seed_turn(&db, &user_id, "user", "第一问", t0).await;
        seed_turn(&db, &user_id, "assistant", "第一答", t0 + Duration::seconds(1)).await;
        seed_turn(&db, &user_id, "user", "第二问", t0 + Duration::seconds(2)).await;

        let context = history_for_context(db.pool(), &user_id, 10).await.unwrap();
        let contents: Vec<&str> = context.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, ["第一问", "第一答", "第二问"]);

        let display = list_for_display(db.pool(), &user_id, &ListConversations::default())
            .await
            .unwrap();
        let contents: Vec<&str> = display.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, ["第二问", "第一答", "第一问"]);
    }

    #[tokio::test]
    async fn test_role_filter() {
        let (db, user_id) = test_db_with_user().await;
        let t0 = Utc::now();

        seed_turn(&db, &user_id, "user", "问", t0).await;
        seed_turn(&db, &user_id, "assistant", "答", t0 + Duration::seconds(1)).await;

        let answers = list_for_display(
            db.pool(),
            &user_id,
            &ListConversations {
                role: Some("assistant".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].content, "答");
    }

    #[tokio::test]
    async fn test_invalid_role_rejected() {
        let (db, user_id) = test_db_with_user().await;

        let err = create_conversation(
            db.pool(),
            &NewConversation {
                user_id: user_id.clone(),
                role: "system".to_string(),
                content: "x".to_string(),
                is_on_topic: false,
            },
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DatabaseError::Validation(_)));
    }

    #[tokio::test]
    async fn test_delete_all_for_user() {
        let (db, user_id) = test_db_with_user().await;
        let t0 = Utc::now();

        seed_turn(&db, &user_id, "user", "问", t0).await;
        seed_turn(&db, &user_id, "assistant", "答", t0 + Duration::seconds(1)).await;

        let deleted = delete_all_for_user(db.pool(), &user_id).await.unwrap();
        assert_eq!(deleted, 2);
        let remaining = history_for_context(db.pool(), &user_id, 10).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn test_cascade_delete_with_user() {
        let (db, user_id) = test_db_with_user().await;
        seed_turn(&db, &user_id, "user", "问", Utc::now()).await;

        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(&user_id)
            .execute(db.pool())
            .await
            .unwrap();

        let remaining = history_for_context(db.pool(), &user_id, 10).await.unwrap();
        assert!(remaining.is_empty());
    }
}
