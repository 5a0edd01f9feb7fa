use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::OrderId;
use domain::{
    CatalogProduct, Discount, FulfillmentStatus, Money, NotificationKind, Order, OrderItem,
    OutboxNotification, PaymentStatus, ProductId, ShippingAddress, ShippingMethod, Warehouse,
};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Result, StoreError,
    store::{
        OrderStore, PaymentCapture, SupplierOrderRef, TrackingOutcome, TrackingUpdate,
        TransitionOutcome, allowed_sources,
    },
};

const ORDER_COLUMNS: &str = r#"
    id, order_number, customer_email, payment_status, fulfillment_status,
    subtotal_cents, shipping_cost_cents, shipping_method, discount_amount_cents, total_cents,
    discount_code, shipping_address, payment_session_id, payment_intent_id,
    supplier_order_id, supplier_order_number, tracking_number, tracking_url, carrier,
    supplier_status, notes, paid_at, digital_delivered_at, email_sent_at,
    shipping_email_sent_at, dispatch_claimed_at, created_at, updated_at
"#;

const OUTBOX_COLUMNS: &str =
    "id, order_id, kind, created_at, attempts, last_error, delivered_at";

/// PostgreSQL-backed order store implementation.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let payment_status: String = row.try_get("payment_status")?;
        let fulfillment_status: String = row.try_get("fulfillment_status")?;
        let shipping_method: Option<String> = row.try_get("shipping_method")?;
        let address_json: Option<serde_json::Value> = row.try_get("shipping_address")?;
        let shipping_address = address_json
            .map(serde_json::from_value::<ShippingAddress>)
            .transpose()?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_number: row.try_get("order_number")?,
            customer_email: row.try_get("customer_email")?,
            payment_status: payment_status.parse::<PaymentStatus>()?,
            fulfillment_status: fulfillment_status.parse::<FulfillmentStatus>()?,
            subtotal: Money::from_cents(row.try_get("subtotal_cents")?),
            shipping_cost: Money::from_cents(row.try_get("shipping_cost_cents")?),
            shipping_method: shipping_method.as_deref().and_then(ShippingMethod::parse),
            discount_amount: Money::from_cents(row.try_get("discount_amount_cents")?),
            total: Money::from_cents(row.try_get("total_cents")?),
            discount_code: row.try_get("discount_code")?,
            shipping_address,
            payment_session_id: row.try_get("payment_session_id")?,
            payment_intent_id: row.try_get("payment_intent_id")?,
            supplier_order_id: row.try_get("supplier_order_id")?,
            supplier_order_number: row.try_get("supplier_order_number")?,
            tracking_number: row.try_get("tracking_number")?,
            tracking_url: row.try_get("tracking_url")?,
            carrier: row.try_get("carrier")?,
            supplier_status: row.try_get("supplier_status")?,
            notes: row.try_get("notes")?,
            paid_at: row.try_get("paid_at")?,
            digital_delivered_at: row.try_get("digital_delivered_at")?,
            email_sent_at: row.try_get("email_sent_at")?,
            shipping_email_sent_at: row.try_get("shipping_email_sent_at")?,
            dispatch_claimed_at: row.try_get("dispatch_claimed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_item(row: PgRow) -> Result<OrderItem> {
        Ok(OrderItem {
            id: row.try_get("id")?,
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            variant_id: row.try_get("variant_id")?,
            product_name: row.try_get("product_name")?,
            quantity: row.try_get::<i32, _>("quantity")? as u32,
            unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
            supplier_variant_id: row.try_get("supplier_variant_id")?,
        })
    }

    fn row_to_product(row: PgRow) -> Result<CatalogProduct> {
        let warehouse: String = row.try_get("warehouse")?;
        Ok(CatalogProduct {
            id: ProductId::new(row.try_get::<String, _>("id")?),
            name: row.try_get("name")?,
            price: Money::from_cents(row.try_get("price_cents")?),
            warehouse: Warehouse::parse(&warehouse),
            weight_grams: row
                .try_get::<Option<i32>, _>("weight_grams")?
                .map(|g| g.max(0) as u32),
            supplier_product_id: row.try_get("supplier_product_id")?,
            supplier_variant_id: row.try_get("supplier_variant_id")?,
            digital_file: row.try_get("digital_file")?,
        })
    }

    fn row_to_notification(row: PgRow) -> Result<OutboxNotification> {
        let kind: String = row.try_get("kind")?;
        let kind = NotificationKind::parse(&kind).ok_or(domain::DomainError::UnknownStatus {
            kind: "notification",
            value: kind,
        })?;
        Ok(OutboxNotification {
            id: row.try_get("id")?,
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            kind,
            created_at: row.try_get("created_at")?,
            attempts: row.try_get::<i32, _>("attempts")? as u32,
            last_error: row.try_get("last_error")?,
            delivered_at: row.try_get("delivered_at")?,
        })
    }

    /// Errors with `OrderNotFound` unless the order exists.
    async fn ensure_exists(&self, order_id: OrderId) -> Result<()> {
        let found: Option<i32> = sqlx::query_scalar("SELECT 1 FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        found.map(|_| ()).ok_or(StoreError::OrderNotFound(order_id))
    }

    async fn enqueue(
        tx: &mut Transaction<'_, Postgres>,
        order_id: OrderId,
        kind: NotificationKind,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO notification_outbox (id, order_id, kind, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (order_id, kind) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(order_id.as_uuid())
        .bind(kind.as_str())
        .bind(now)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

/// Source statuses as the strings stored in `fulfillment_status`.
fn source_names(target: FulfillmentStatus) -> Vec<String> {
    allowed_sources(target)
        .into_iter()
        .map(|s| s.as_str().to_string())
        .collect()
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn insert_order(&self, order: &Order, items: &[OrderItem]) -> Result<()> {
        let address = order
            .shipping_address
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, order_number, customer_email, payment_status, fulfillment_status,
                subtotal_cents, shipping_cost_cents, shipping_method, discount_amount_cents,
                total_cents, discount_code, shipping_address, payment_session_id,
                notes, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(&order.order_number)
        .bind(&order.customer_email)
        .bind(order.payment_status.as_str())
        .bind(order.fulfillment_status.as_str())
        .bind(order.subtotal.cents())
        .bind(order.shipping_cost.cents())
        .bind(order.shipping_method.map(|m| m.as_str()))
        .bind(order.discount_amount.cents())
        .bind(order.total.cents())
        .bind(&order.discount_code)
        .bind(address)
        .bind(&order.payment_session_id)
        .bind(&order.notes)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::DuplicateOrder(order.order_number.clone());
            }
            StoreError::Database(e)
        })?;

        for (line_no, item) in items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (
                    id, order_id, line_no, product_id, variant_id, product_name,
                    quantity, unit_price_cents, supplier_variant_id
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(item.id)
            .bind(order.id.as_uuid())
            .bind(line_no as i32)
            .bind(item.product_id.as_str())
            .bind(&item.variant_id)
            .bind(&item.product_name)
            .bind(item.quantity as i32)
            .bind(item.unit_price.cents())
            .bind(&item.supplier_variant_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn get_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, product_id, variant_id, product_name, quantity,
                   unit_price_cents, supplier_variant_id
            FROM order_items
            WHERE order_id = $1
            ORDER BY line_no ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_item).collect()
    }

    async fn get_products(&self, product_ids: &[ProductId]) -> Result<Vec<CatalogProduct>> {
        let ids: Vec<String> = product_ids.iter().map(|p| p.as_str().to_string()).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, name, price_cents, warehouse, weight_grams,
                   supplier_product_id, supplier_variant_id, digital_file
            FROM products
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_product).collect()
    }

    async fn get_discount(&self, code: &str) -> Result<Option<Discount>> {
        let row = sqlx::query(
            r#"
            SELECT code, percent_off, active, usage_count, max_uses
            FROM discounts
            WHERE UPPER(code) = UPPER($1)
            "#,
        )
        .bind(code.trim())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(Discount {
                code: row.try_get("code")?,
                percent_off: row.try_get::<i16, _>("percent_off")?.clamp(0, 100) as u8,
                active: row.try_get("active")?,
                usage_count: row.try_get::<i32, _>("usage_count")? as u32,
                max_uses: row.try_get::<Option<i32>, _>("max_uses")?.map(|m| m as u32),
            })
        })
        .transpose()
    }

    async fn record_payment(
        &self,
        order_id: OrderId,
        capture: &PaymentCapture,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        let address = capture
            .shipping_address
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let mut tx = self.pool.begin().await?;

        let applied: Option<Option<String>> = sqlx::query_scalar(
            r#"
            UPDATE orders SET
                payment_status = 'paid',
                fulfillment_status = CASE
                    WHEN fulfillment_status = 'unfulfilled' THEN 'processing'
                    ELSE fulfillment_status
                END,
                customer_email = COALESCE($3, customer_email),
                shipping_address = COALESCE($4, shipping_address),
                payment_session_id = $5,
                payment_intent_id = $6,
                discount_code = COALESCE(discount_code, $7),
                paid_at = $2,
                updated_at = $2
            WHERE id = $1 AND payment_status = 'pending'
            RETURNING discount_code
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(now)
        .bind(&capture.customer_email)
        .bind(address)
        .bind(&capture.session_id)
        .bind(&capture.payment_intent_id)
        .bind(&capture.discount_code)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(discount_code) = applied else {
            tx.rollback().await?;
            self.ensure_exists(order_id).await?;
            return Ok(TransitionOutcome::Unchanged);
        };

        if let Some(code) = discount_code {
            sqlx::query(
                r#"
                UPDATE discounts SET usage_count = usage_count + 1
                WHERE UPPER(code) = UPPER($1)
                "#,
            )
            .bind(code)
            .execute(&mut *tx)
            .await?;
        }
        Self::enqueue(&mut tx, order_id, NotificationKind::OrderConfirmation, now).await?;

        tx.commit().await?;
        Ok(TransitionOutcome::Applied)
    }

    async fn expire_payment(
        &self,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET
                payment_status = 'expired',
                fulfillment_status = 'cancelled',
                updated_at = $2
            WHERE id = $1 AND payment_status = 'pending' AND fulfillment_status = ANY($3)
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(now)
        .bind(source_names(FulfillmentStatus::Cancelled))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.ensure_exists(order_id).await?;
            return Ok(TransitionOutcome::Unchanged);
        }
        Ok(TransitionOutcome::Applied)
    }

    async fn advance_fulfillment(
        &self,
        order_id: OrderId,
        target: FulfillmentStatus,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET fulfillment_status = $2, updated_at = $3
            WHERE id = $1 AND fulfillment_status = ANY($4)
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(target.as_str())
        .bind(now)
        .bind(source_names(target))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.ensure_exists(order_id).await?;
            return Ok(TransitionOutcome::Unchanged);
        }
        Ok(TransitionOutcome::Applied)
    }

    async fn mark_digital_delivered(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET
                digital_delivered_at = COALESCE(digital_delivered_at, $2),
                updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotFound(order_id));
        }
        Ok(())
    }

    async fn set_notes(
        &self,
        order_id: OrderId,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE orders SET notes = $2, updated_at = $3 WHERE id = $1")
            .bind(order_id.as_uuid())
            .bind(notes)
            .bind(now)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotFound(order_id));
        }
        Ok(())
    }

    async fn try_claim_dispatch(
        &self,
        order_id: OrderId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET dispatch_claimed_at = $2
            WHERE id = $1
              AND supplier_order_id IS NULL
              AND (dispatch_claimed_at IS NULL OR dispatch_claimed_at < $3)
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(now)
        .bind(now - lease)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.ensure_exists(order_id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn complete_dispatch(
        &self,
        order_id: OrderId,
        supplier: &SupplierOrderRef,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET
                supplier_order_id = $2,
                supplier_order_number = $3,
                notes = $4,
                dispatch_claimed_at = NULL,
                updated_at = $5
            WHERE id = $1 AND supplier_order_id IS NULL
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(&supplier.order_id)
        .bind(&supplier.order_number)
        .bind(notes)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.ensure_exists(order_id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn fail_dispatch(
        &self,
        order_id: OrderId,
        notes: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET notes = $2, dispatch_claimed_at = NULL, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(notes)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotFound(order_id));
        }
        Ok(())
    }

    async fn orders_awaiting_tracking(&self) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE fulfillment_status IN ('processing', 'shipped')
              AND supplier_order_number IS NOT NULL
            ORDER BY created_at ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }

    async fn record_tracking(
        &self,
        order_id: OrderId,
        update: &TrackingUpdate,
        now: DateTime<Utc>,
    ) -> Result<TrackingOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::OrderNotFound(order_id))?;
        let current = Self::row_to_order(row)?;

        let differs = |new: &Option<String>, old: &Option<String>| new.is_some() && new != old;
        let mut changed = differs(&update.tracking_number, &current.tracking_number)
            || differs(&update.tracking_url, &current.tracking_url)
            || differs(&update.carrier, &current.carrier)
            || differs(&update.supplier_status, &current.supplier_status);

        let mut status = current.fulfillment_status;
        if let Some(next) = update.next_status
            && status.can_advance_to(next)
        {
            status = next;
            changed = true;
        }

        if changed {
            sqlx::query(
                r#"
                UPDATE orders SET
                    tracking_number = COALESCE($2, tracking_number),
                    tracking_url = COALESCE($3, tracking_url),
                    carrier = COALESCE($4, carrier),
                    supplier_status = COALESCE($5, supplier_status),
                    fulfillment_status = $6,
                    updated_at = $7
                WHERE id = $1
                "#,
            )
            .bind(order_id.as_uuid())
            .bind(&update.tracking_number)
            .bind(&update.tracking_url)
            .bind(&update.carrier)
            .bind(&update.supplier_status)
            .bind(status.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        let has_tracking = update.tracking_number.is_some() || current.tracking_number.is_some();
        let notification_queued = if has_tracking && current.shipping_email_sent_at.is_none() {
            Self::enqueue(&mut tx, order_id, NotificationKind::ShippingUpdate, now).await?
        } else {
            false
        };

        tx.commit().await?;
        Ok(TrackingOutcome {
            changed,
            status,
            notification_queued,
        })
    }

    async fn pending_notifications(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<OutboxNotification>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {OUTBOX_COLUMNS} FROM notification_outbox
            WHERE delivered_at IS NULL AND attempts < $1
            ORDER BY created_at ASC
            LIMIT $2
            "#
        ))
        .bind(max_attempts as i32)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_notification).collect()
    }

    async fn pending_notifications_for_order(
        &self,
        order_id: OrderId,
        max_attempts: u32,
    ) -> Result<Vec<OutboxNotification>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {OUTBOX_COLUMNS} FROM notification_outbox
            WHERE order_id = $1 AND delivered_at IS NULL AND attempts < $2
            ORDER BY created_at ASC
            "#
        ))
        .bind(order_id.as_uuid())
        .bind(max_attempts as i32)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_notification).collect()
    }

    async fn mark_notification_delivered(
        &self,
        notification_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE notification_outbox SET
                attempts = attempts + 1,
                delivered_at = $2,
                last_error = NULL
            WHERE id = $1 AND delivered_at IS NULL
            RETURNING order_id, kind
            "#,
        )
        .bind(notification_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = row {
            let order_id: Uuid = row.try_get("order_id")?;
            let kind: String = row.try_get("kind")?;
            let column = match NotificationKind::parse(&kind) {
                Some(NotificationKind::OrderConfirmation) => "email_sent_at",
                Some(NotificationKind::ShippingUpdate) => "shipping_email_sent_at",
                None => {
                    return Err(domain::DomainError::UnknownStatus {
                        kind: "notification",
                        value: kind,
                    }
                    .into());
                }
            };
            sqlx::query(&format!(
                "UPDATE orders SET {column} = $2, updated_at = $2 WHERE id = $1"
            ))
            .bind(order_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn mark_notification_failed(&self, notification_id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notification_outbox SET attempts = attempts + 1, last_error = $2
            WHERE id = $1 AND delivered_at IS NULL
            "#,
        )
        .bind(notification_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
