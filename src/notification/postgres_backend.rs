//! PostgreSQL-based notification backend.
//!
//! Uniqueness is enforced by the schema:
//! - `notifications (school_id, recipient_id, source_type, source_id)`
//! - `notification_deliveries (notification_id, channel)`
//!
//! Credit reservation runs the conditional decrement and the delivery upsert
//! in one transaction; the transaction commits before any transport call.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::error::StoreError;

use super::backend::{NotificationStore, Reservation};
use super::types::{
    Channel, Delivery, DeliveryUpdate, Notification, NotificationKey, Payload, SkipReason,
    SourceType, StatusQuery, Subscription,
};

const NOTIFICATION_COLUMNS: &str =
    "id, school_id, recipient_id, source_type, source_id, template_id, payload, created_at, updated_at";

const DELIVERY_COLUMNS: &str = "id, notification_id, channel, status, skip_reason, error, provider, \
     provider_msg_id, sent_at, attempt_count, credit_refunded, updated_at";

/// PostgreSQL-based notification backend.
pub struct PostgresNotificationStore {
    pool: PgPool,
}

impl PostgresNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn notification_from_row(row: &PgRow) -> Result<Notification, StoreError> {
    let payload: serde_json::Value = row.try_get("payload")?;
    Ok(Notification {
        id: row.try_get("id")?,
        school_id: row.try_get("school_id")?,
        recipient_id: row.try_get("recipient_id")?,
        source_type: StoreError::parse_column(row.try_get::<String, _>("source_type")?)?,
        source_id: row.try_get("source_id")?,
        template_id: row.try_get("template_id")?,
        payload: serde_json::from_value(payload)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn delivery_from_row(row: &PgRow) -> Result<Delivery, StoreError> {
    Ok(Delivery {
        id: row.try_get("id")?,
        notification_id: row.try_get("notification_id")?,
        channel: StoreError::parse_column(row.try_get::<String, _>("channel")?)?,
        status: StoreError::parse_column(row.try_get::<String, _>("status")?)?,
        skip_reason: row.try_get("skip_reason")?,
        error: row.try_get("error")?,
        provider: row.try_get("provider")?,
        provider_msg_id: row.try_get("provider_msg_id")?,
        sent_at: row.try_get("sent_at")?,
        attempt_count: row.try_get("attempt_count")?,
        credit_refunded: row.try_get("credit_refunded")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert-or-overwrite a delivery row on an open connection or transaction.
async fn upsert_delivery_on(
    conn: &mut PgConnection,
    notification_id: Uuid,
    channel: Channel,
    update: &DeliveryUpdate,
) -> Result<Delivery, StoreError> {
    let cols = update.columns();
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO notification_deliveries
            (id, notification_id, channel, status, skip_reason, error, provider,
             provider_msg_id, sent_at, attempt_count, credit_refunded, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, FALSE, NOW())
        ON CONFLICT (notification_id, channel) DO UPDATE SET
            status = EXCLUDED.status,
            skip_reason = EXCLUDED.skip_reason,
            error = EXCLUDED.error,
            provider = EXCLUDED.provider,
            provider_msg_id = EXCLUDED.provider_msg_id,
            sent_at = EXCLUDED.sent_at,
            attempt_count = notification_deliveries.attempt_count + EXCLUDED.attempt_count,
            credit_refunded = CASE WHEN EXCLUDED.status = 'PENDING' THEN FALSE
                                   ELSE notification_deliveries.credit_refunded END,
            updated_at = NOW()
        RETURNING {}
        "#,
        DELIVERY_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(notification_id)
    .bind(channel.as_str())
    .bind(cols.status.as_str())
    .bind(&cols.skip_reason)
    .bind(&cols.error)
    .bind(&cols.provider)
    .bind(&cols.provider_msg_id)
    .bind(cols.sent_at)
    .bind(update.attempt_increment())
    .fetch_one(&mut *conn)
    .await?;

    delivery_from_row(&row)
}

#[async_trait]
impl NotificationStore for PostgresNotificationStore {
    fn backend_type(&self) -> &'static str {
        "postgres"
    }

    async fn upsert_notification(
        &self,
        key: &NotificationKey,
        template_id: Uuid,
        payload: &Payload,
    ) -> Result<Notification, StoreError> {
        let payload = serde_json::to_value(payload)?;
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO notifications
                (id, school_id, recipient_id, source_type, source_id, template_id, payload,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
            ON CONFLICT (school_id, recipient_id, source_type, source_id) DO UPDATE SET
                template_id = EXCLUDED.template_id,
                payload = EXCLUDED.payload,
                updated_at = NOW()
            RETURNING {}
            "#,
            NOTIFICATION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&key.school_id)
        .bind(&key.recipient_id)
        .bind(key.source_type.as_str())
        .bind(&key.source_id)
        .bind(template_id)
        .bind(&payload)
        .fetch_one(&self.pool)
        .await?;

        notification_from_row(&row)
    }

    async fn get_notification(&self, id: Uuid) -> Result<Option<Notification>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM notifications WHERE id = $1",
            NOTIFICATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(notification_from_row).transpose()
    }

    async fn deliveries(&self, notification_id: Uuid) -> Result<Vec<Delivery>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM notification_deliveries WHERE notification_id = $1 ORDER BY channel",
            DELIVERY_COLUMNS
        ))
        .bind(notification_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(delivery_from_row).collect()
    }

    async fn upsert_delivery(
        &self,
        notification_id: Uuid,
        channel: Channel,
        update: &DeliveryUpdate,
    ) -> Result<Delivery, StoreError> {
        let mut conn = self.pool.acquire().await?;
        upsert_delivery_on(&mut conn, notification_id, channel, update).await
    }

    async fn reserve_delivery(
        &self,
        notification_id: Uuid,
        entity_id: &str,
        channel: Channel,
    ) -> Result<Reservation, StoreError> {
        let mut tx = self.pool.begin().await?;

        if channel.is_metered() {
            let result = sqlx::query(
                r#"
                UPDATE notification_subscriptions
                SET balance = balance - 1, updated_at = NOW()
                WHERE entity_id = $1 AND channel = $2 AND balance > 0
                "#,
            )
            .bind(entity_id)
            .bind(channel.as_str())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                let row = upsert_delivery_on(
                    &mut tx,
                    notification_id,
                    channel,
                    &DeliveryUpdate::skipped(SkipReason::InsufficientCreditRace),
                )
                .await?;
                tx.commit().await?;
                return Ok(Reservation::RaceLost(row));
            }
        }

        let row = upsert_delivery_on(&mut tx, notification_id, channel, &DeliveryUpdate::Pending).await?;
        tx.commit().await?;
        Ok(Reservation::Reserved(row))
    }

    async fn refund_delivery(
        &self,
        notification_id: Uuid,
        entity_id: &str,
        channel: Channel,
    ) -> Result<bool, StoreError> {
        if !channel.is_metered() {
            return Ok(false);
        }

        let mut tx = self.pool.begin().await?;

        let flagged = sqlx::query(
            r#"
            UPDATE notification_deliveries
            SET credit_refunded = TRUE, updated_at = NOW()
            WHERE notification_id = $1 AND channel = $2
              AND status = 'FAILED' AND credit_refunded = FALSE
            "#,
        )
        .bind(notification_id)
        .bind(channel.as_str())
        .execute(&mut *tx)
        .await?;

        if flagged.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let credited = sqlx::query(
            r#"
            UPDATE notification_subscriptions
            SET balance = COALESCE(balance, 0) + 1, updated_at = NOW()
            WHERE entity_id = $1 AND channel = $2
            "#,
        )
        .bind(entity_id)
        .bind(channel.as_str())
        .execute(&mut *tx)
        .await?;

        if credited.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn preferred_channels(
        &self,
        entity_id: &str,
        source_type: SourceType,
    ) -> Result<BTreeSet<Channel>, StoreError> {
        let channels: Vec<String> = sqlx::query_scalar(
            "SELECT channel FROM notification_preferences WHERE entity_id = $1 AND source_type = $2",
        )
        .bind(entity_id)
        .bind(source_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        channels.into_iter().map(StoreError::parse_column).collect()
    }

    async fn subscriptions(&self, entity_id: &str) -> Result<Vec<Subscription>, StoreError> {
        let rows: Vec<(String, String, Option<i64>)> = sqlx::query_as(
            "SELECT channel, status, balance FROM notification_subscriptions WHERE entity_id = $1",
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(channel, status, balance)| {
                Ok(Subscription {
                    entity_id: entity_id.to_string(),
                    channel: StoreError::parse_column(channel)?,
                    status: StoreError::parse_column(status)?,
                    balance,
                })
            })
            .collect()
    }

    async fn set_preference(
        &self,
        entity_id: &str,
        source_type: SourceType,
        channel: Channel,
        enabled: bool,
    ) -> Result<(), StoreError> {
        let sql = if enabled {
            r#"
            INSERT INTO notification_preferences (entity_id, source_type, channel)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#
        } else {
            "DELETE FROM notification_preferences WHERE entity_id = $1 AND source_type = $2 AND channel = $3"
        };

        sqlx::query(sql)
            .bind(entity_id)
            .bind(source_type.as_str())
            .bind(channel.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO notification_subscriptions (entity_id, channel, status, balance, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (entity_id, channel) DO UPDATE SET
                status = EXCLUDED.status,
                balance = EXCLUDED.balance,
                updated_at = NOW()
            "#,
        )
        .bind(&subscription.entity_id)
        .bind(subscription.channel.as_str())
        .bind(subscription.status.as_str())
        .bind(subscription.balance)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_notifications(
        &self,
        query: &StatusQuery,
    ) -> Result<Vec<(Notification, Vec<Delivery>)>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM notifications
            WHERE school_id = $1 AND source_type = $2 AND source_id = ANY($3)
              AND ($4::text IS NULL OR recipient_id = $4)
            "#,
            NOTIFICATION_COLUMNS
        ))
        .bind(&query.school_id)
        .bind(query.source_type.as_str())
        .bind(query.source_ids.as_slice())
        .bind(&query.recipient_id)
        .fetch_all(&self.pool)
        .await?;

        let notifications = rows
            .iter()
            .map(notification_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        if notifications.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = notifications.iter().map(|n| n.id).collect();
        let delivery_rows = sqlx::query(&format!(
            "SELECT {} FROM notification_deliveries WHERE notification_id = ANY($1)",
            DELIVERY_COLUMNS
        ))
        .bind(ids.as_slice())
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<Uuid, Vec<Delivery>> = HashMap::new();
        for row in &delivery_rows {
            let delivery = delivery_from_row(row)?;
            grouped.entry(delivery.notification_id).or_default().push(delivery);
        }

        Ok(notifications
            .into_iter()
            .map(|n| {
                let deliveries = grouped.remove(&n.id).unwrap_or_default();
                (n, deliveries)
            })
            .collect())
    }
}
