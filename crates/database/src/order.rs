//! Payment order operations.
//!
//! Orders are the source of truth mapping a vendor callback back to a user.
//! Marking an order paid and activating its user happen inside a single
//! transaction keyed by the order id, and the operation is idempotent so a
//! vendor retrying its webhook cannot double-activate or double-extend.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::{DatabaseError, Result};
use crate::models::{Order, User};
use crate::retry::with_backoff;

const ORDER_COLUMNS: &str =
    "id, user_id, plan_id, amount_cents, payment_method, status, created_at, paid_at";

const USER_COLUMNS: &str = "id, phone_number, verification_code, verification_code_expires_at, \
     name, gender, birth_date, birth_time, birth_place, initial_question, metadata, \
     is_active, activated_at, expires_at, max_conversations, used_conversations, \
     created_at, updated_at";

/// Validated input shape for creating an order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    /// Vendor-visible order number; the caller generates it.
    pub id: String,
    pub user_id: String,
    pub plan_id: String,
    pub amount_cents: i64,
    pub payment_method: String,
}

/// Result of handling a success callback.
#[derive(Debug, Clone, PartialEq)]
pub enum SettleOutcome {
    /// First verified callback: order flipped to paid, user activated.
    Activated { order: Order, user: User },
    /// The order was already paid; nothing changed.
    AlreadyPaid(Order),
}

/// Persist a pending order.
pub async fn create_order(pool: &SqlitePool, order: &NewOrder, now: DateTime<Utc>) -> Result<Order> {
    let query = format!(
        "INSERT INTO orders (id, user_id, plan_id, amount_cents, payment_method, status, created_at) \
         VALUES (?, ?, ?, ?, ?, 'pending', ?) RETURNING {ORDER_COLUMNS}"
    );

    sqlx::query_as::<_, Order>(&query)
        .bind(&order.id)
        .bind(&order.user_id)
        .bind(&order.plan_id)
        .bind(order.amount_cents)
        .bind(&order.payment_method)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.is_unique_violation() {
                    return DatabaseError::AlreadyExists {
                        entity: "Order",
                        id: order.id.clone(),
                    };
                }
            }
            DatabaseError::Sqlx(e)
        })
}

/// Get an order by its number.
pub async fn get_order(pool: &SqlitePool, id: &str) -> Result<Option<Order>> {
    let query = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?");
    let order = with_backoff(|| {
        sqlx::query_as::<_, Order>(&query)
            .bind(id)
            .fetch_optional(pool)
    })
    .await?;
    Ok(order)
}

/// List a user's orders, newest first.
pub async fn list_for_user(pool: &SqlitePool, user_id: &str) -> Result<Vec<Order>> {
    let query = format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = ? ORDER BY created_at DESC"
    );
    let orders = with_backoff(|| {
        sqlx::query_as::<_, Order>(&query)
            .bind(user_id)
            .fetch_all(pool)
    })
    .await?;
    Ok(orders)
}

/// Settle a verified success callback: mark the order paid and grant its
/// user the plan's entitlement, atomically and idempotently.
pub async fn settle_paid_order(
    pool: &SqlitePool,
    order_id: &str,
    valid_days: i64,
    max_conversations: i64,
    now: DateTime<Utc>,
) -> Result<SettleOutcome> {
    let mut tx = pool.begin().await?;

    let query = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?");
    let order = sqlx::query_as::<_, Order>(&query)
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DatabaseError::NotFound {
            entity: "Order",
            id: order_id.to_string(),
        })?;

    if order.status == Order::PAID {
        tx.commit().await?;
        return Ok(SettleOutcome::AlreadyPaid(order));
    }

    let query = format!(
        "UPDATE orders SET status = 'paid', paid_at = ? WHERE id = ? RETURNING {ORDER_COLUMNS}"
    );
    let order = sqlx::query_as::<_, Order>(&query)
        .bind(now)
        .bind(order_id)
        .fetch_one(&mut *tx)
        .await?;

    let expires_at = now + chrono::Duration::days(valid_days);
    let query = format!(
        "UPDATE users SET activated_at = ?, expires_at = ?, max_conversations = ?, \
         used_conversations = 0, updated_at = ? WHERE id = ? RETURNING {USER_COLUMNS}"
    );
    let user = sqlx::query_as::<_, User>(&query)
        .bind(now)
        .bind(expires_at)
        .bind(max_conversations)
        .bind(now)
        .bind(&order.user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DatabaseError::NotFound {
            entity: "User",
            id: order.user_id.clone(),
        })?;

    tx.commit().await?;
    Ok(SettleOutcome::Activated { order, user })
}

/// Record a verified failure callback.
pub async fn mark_failed(pool: &SqlitePool, order_id: &str) -> Result<Order> {
    let query = format!(
        "UPDATE orders SET status = 'failed' WHERE id = ? AND status = 'pending' \
         RETURNING {ORDER_COLUMNS}"
    );
    let order = with_backoff(|| {
        sqlx::query_as::<_, Order>(&query)
            .bind(order_id)
            .fetch_optional(pool)
    })
    .await?;

    order.ok_or_else(|| DatabaseError::NotFound {
        entity: "Order",
        id: order_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlement;
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

    fn weekly_order(user_id: &str) -> NewOrder {
        NewOrder {
            id: "TJG17000000000000AB12C".to_string(),
            user_id: user_id.to_string(),
            plan_id: "weekly".to_string(),
            amount_cents: 1990,
            payment_method: "alipay".to_string(),
        }
    }

    #[tokio::test]
    async fn test_settle_activates_user_once() {
        let (db, user_id) = test_db_with_user().await;
        let now = Utc::now();

        let order = create_order(db.pool(), &weekly_order(&user_id), now)
            .await
            .unwrap();
        assert_eq!(order.status, Order::PENDING);

        let outcome = settle_paid_order(db.pool(), &order.id, 7, 100, now)
            .await
            .unwrap();
        let user = match outcome {
            SettleOutcome::Activated { order, user } => {
                assert_eq!(order.status, Order::PAID);
                assert!(order.paid_at.is_some());
                user
            }
            other => panic!("expected activation, got {other:?}"),
        };
        assert!(entitlement::is_activated(&user));
        assert_eq!(entitlement::remaining_conversations(&user), 100);

        // The vendor retries its webhook; nothing changes.
        let replay = settle_paid_order(db.pool(), &order.id, 7, 100, now + Duration::hours(1))
            .await
            .unwrap();
        assert!(matches!(replay, SettleOutcome::AlreadyPaid(_)));

        let user = user::get_user(db.pool(), &user_id).await.unwrap().unwrap();
        let drift = user.expires_at.unwrap() - (now + Duration::days(7));
        assert!(drift.num_seconds().abs() < 1);
    }

    #[tokio::test]
    async fn test_settle_unknown_order() {
        let (db, _) = test_db_with_user().await;
        let err = settle_paid_order(db.pool(), "TJG-missing", 7, 100, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_mark_failed_only_from_pending() {
        let (db, user_id) = test_db_with_user().await;
        let now = Utc::now();

        let order = create_order(db.pool(), &weekly_order(&user_id), now)
            .await
            .unwrap();
        let failed = mark_failed(db.pool(), &order.id).await.unwrap();
        assert_eq!(failed.status, Order::FAILED);

        // Already-settled orders cannot be failed afterwards.
        let err = mark_failed(db.pool(), &order.id).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_order_number_rejected() {
        let (db, user_id) = test_db_with_user().await;
        let now = Utc::now();

        create_order(db.pool(), &weekly_order(&user_id), now)
            .await
            .unwrap();
        let err = create_order(db.pool(), &weekly_order(&user_id), now)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::AlreadyExists { .. }));
    }
}
