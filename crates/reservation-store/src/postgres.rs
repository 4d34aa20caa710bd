use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgPoolOptions, postgres::PgRow};

use crate::{
    ProductId, ProductStock, Reservation, ReservationConfirmed, ReservationId, ReservationOutcome,
    ReservationStatus, Result, SessionId, StockError, available_stock,
    store::{ReservationStore, ReserveStock, validate_quantity, validate_session},
};

const RESERVATION_COLUMNS: &str =
    "id, product_id, session_id, quantity, status, expires_at, created_at, updated_at, settled_at";

/// Quantity that counts against a product's stock: live reservations plus
/// confirmations the fulfillment side has not settled yet.
const COMMITTED_SQL: &str = r#"
    SELECT COALESCE(SUM(quantity), 0)::INTEGER
    FROM stock_reservations
    WHERE product_id = $1
      AND ((status = $2 AND expires_at > NOW()) OR (status = $3 AND settled_at IS NULL))
"#;

/// PostgreSQL-backed reservation store.
///
/// `reserve` and `update_quantity` take a `SELECT ... FOR UPDATE` lock on the
/// product row before summing committed quantity, so attempts on the same
/// product queue behind each other while different products run in parallel.
#[derive(Clone)]
pub struct PgReservationStore {
    pool: PgPool,
}

impl PgReservationStore {
    /// Creates a new store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_reservation(row: PgRow) -> Result<Reservation> {
        let status: String = row.try_get("status")?;
        Ok(Reservation {
            id: ReservationId::new(row.try_get("id")?),
            product_id: ProductId::new(row.try_get("product_id")?),
            session_id: SessionId::new(row.try_get::<String, _>("session_id")?),
            quantity: row.try_get("quantity")?,
            status: ReservationStatus::from_columns(
                &status,
                row.try_get("expires_at")?,
                row.try_get("settled_at")?,
            )?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_confirmation(row: PgRow) -> Result<ReservationConfirmed> {
        Ok(ReservationConfirmed {
            reservation_id: ReservationId::new(row.try_get("id")?),
            product_id: ProductId::new(row.try_get("product_id")?),
            session_id: SessionId::new(row.try_get::<String, _>("session_id")?),
            quantity: row.try_get("quantity")?,
            confirmed_at: row.try_get("updated_at")?,
        })
    }

    /// Locks the product row for the rest of the transaction.
    async fn lock_product(
        tx: &mut Transaction<'_, Postgres>,
        product_id: ProductId,
    ) -> Result<ProductStock> {
        let row = sqlx::query("SELECT stock, is_active FROM products WHERE id = $1 FOR UPDATE")
            .bind(product_id.as_i32())
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(StockError::ProductNotFound(product_id))?;

        Ok(ProductStock {
            product_id,
            stock: row.try_get("stock")?,
            is_active: row.try_get("is_active")?,
        })
    }

    async fn committed(tx: &mut Transaction<'_, Postgres>, product_id: ProductId) -> Result<i32> {
        let committed: i32 = sqlx::query_scalar(COMMITTED_SQL)
            .bind(product_id.as_i32())
            .bind(ReservationStatus::RESERVED)
            .bind(ReservationStatus::CONFIRMED)
            .fetch_one(&mut **tx)
            .await?;
        Ok(committed)
    }
}

#[async_trait]
impl ReservationStore for PgReservationStore {
    #[tracing::instrument(skip(self, request), fields(product_id = %request.product_id, quantity = request.quantity))]
    async fn reserve(&self, request: ReserveStock) -> Result<ReservationOutcome> {
        request.validate()?;
        let started = Instant::now();

        // Any early return drops `tx`, which rolls it back.
        let mut tx = self.pool.begin().await?;

        let product = Self::lock_product(&mut tx, request.product_id).await?;
        if !product.is_active {
            return Err(StockError::ProductUnavailable(request.product_id));
        }

        let committed = Self::committed(&mut tx, request.product_id).await?;
        let available = available_stock(product.stock, committed);
        if available < request.quantity {
            metrics::counter!("stock_reservations_rejected_total").increment(1);
            return Err(StockError::InsufficientStock {
                product_id: request.product_id,
                requested: request.quantity,
                available,
            });
        }

        // Lapsed rows of this pair would collide with the partial unique index.
        sqlx::query(
            r#"
            UPDATE stock_reservations
            SET status = $3, updated_at = NOW()
            WHERE session_id = $1 AND product_id = $2 AND status = $4 AND expires_at <= NOW()
            "#,
        )
        .bind(request.session_id.as_str())
        .bind(request.product_id.as_i32())
        .bind(ReservationStatus::EXPIRED)
        .bind(ReservationStatus::RESERVED)
        .execute(&mut *tx)
        .await?;

        let topped_up = sqlx::query(&format!(
            r#"
            UPDATE stock_reservations
            SET quantity = quantity + $3,
                expires_at = NOW() + make_interval(mins => $4::INTEGER),
                updated_at = NOW()
            WHERE session_id = $1 AND product_id = $2 AND status = $5
            RETURNING {RESERVATION_COLUMNS}
            "#
        ))
        .bind(request.session_id.as_str())
        .bind(request.product_id.as_i32())
        .bind(request.quantity)
        .bind(request.ttl_minutes)
        .bind(ReservationStatus::RESERVED)
        .fetch_optional(&mut *tx)
        .await?;

        let row = match topped_up {
            Some(row) => row,
            None => {
                sqlx::query(&format!(
                    r#"
                    INSERT INTO stock_reservations (product_id, session_id, quantity, status, expires_at)
                    VALUES ($1, $2, $3, $5, NOW() + make_interval(mins => $4::INTEGER))
                    RETURNING {RESERVATION_COLUMNS}
                    "#
                ))
                .bind(request.product_id.as_i32())
                .bind(request.session_id.as_str())
                .bind(request.quantity)
                .bind(request.ttl_minutes)
                .bind(ReservationStatus::RESERVED)
                .fetch_one(&mut *tx)
                .await?
            }
        };
        let reservation = Self::row_to_reservation(row)?;

        tx.commit().await?;

        metrics::counter!("stock_reservations_created_total").increment(1);
        metrics::histogram!("stock_reserve_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::debug!(reservation_id = %reservation.id, "stock reserved");

        Ok(ReservationOutcome {
            reservation,
            available_stock: available_stock(product.stock, committed + request.quantity),
        })
    }

    #[tracing::instrument(skip(self))]
    async fn release(
        &self,
        session_id: &SessionId,
        product_id: Option<ProductId>,
    ) -> Result<u64> {
        validate_session(session_id)?;

        let result = sqlx::query(
            r#"
            UPDATE stock_reservations
            SET status = $3, updated_at = NOW()
            WHERE session_id = $1
              AND status = $4
              AND ($2::INTEGER IS NULL OR product_id = $2)
            "#,
        )
        .bind(session_id.as_str())
        .bind(product_id.map(|p| p.as_i32()))
        .bind(ReservationStatus::RELEASED)
        .bind(ReservationStatus::RESERVED)
        .execute(&self.pool)
        .await?;

        let count = result.rows_affected();
        metrics::counter!("stock_reservations_released_total").increment(count);
        Ok(count)
    }

    #[tracing::instrument(skip(self))]
    async fn confirm(&self, session_id: &SessionId) -> Result<Vec<ReservationConfirmed>> {
        validate_session(session_id)?;

        let rows = sqlx::query(
            r#"
            UPDATE stock_reservations
            SET status = $2, updated_at = NOW()
            WHERE session_id = $1 AND status = $3 AND expires_at > NOW()
            RETURNING id, product_id, session_id, quantity, updated_at
            "#,
        )
        .bind(session_id.as_str())
        .bind(ReservationStatus::CONFIRMED)
        .bind(ReservationStatus::RESERVED)
        .fetch_all(&self.pool)
        .await?;

        let mut events = rows
            .into_iter()
            .map(Self::row_to_confirmation)
            .collect::<Result<Vec<_>>>()?;
        events.sort_by_key(|e| e.reservation_id);

        metrics::counter!("stock_reservations_confirmed_total").increment(events.len() as u64);
        Ok(events)
    }

    async fn expire_stale(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE stock_reservations
            SET status = $1, updated_at = NOW()
            WHERE status = $2 AND expires_at <= NOW()
            "#,
        )
        .bind(ReservationStatus::EXPIRED)
        .bind(ReservationStatus::RESERVED)
        .execute(&self.pool)
        .await?;

        let count = result.rows_affected();
        metrics::counter!("stock_reservations_expired_total").increment(count);
        Ok(count)
    }

    async fn available_stock(&self, product_id: ProductId) -> Result<i32> {
        let row = sqlx::query(&format!(
            "SELECT stock, ({COMMITTED_SQL}) AS committed FROM products WHERE id = $1"
        ))
        .bind(product_id.as_i32())
        .bind(ReservationStatus::RESERVED)
        .bind(ReservationStatus::CONFIRMED)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StockError::ProductNotFound(product_id))?;

        Ok(available_stock(
            row.try_get("stock")?,
            row.try_get("committed")?,
        ))
    }

    #[tracing::instrument(skip(self))]
    async fn update_quantity(
        &self,
        session_id: &SessionId,
        product_id: ProductId,
        new_quantity: i32,
    ) -> Result<Option<ReservationOutcome>> {
        validate_session(session_id)?;
        validate_quantity(new_quantity)?;

        let mut tx = self.pool.begin().await?;
        let product = Self::lock_product(&mut tx, product_id).await?;

        let existing = sqlx::query(&format!(
            r#"
            SELECT {RESERVATION_COLUMNS}
            FROM stock_reservations
            WHERE session_id = $1 AND product_id = $2 AND status = $3 AND expires_at > NOW()
            FOR UPDATE
            "#
        ))
        .bind(session_id.as_str())
        .bind(product_id.as_i32())
        .bind(ReservationStatus::RESERVED)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(existing) = existing.map(Self::row_to_reservation).transpose()? else {
            return Ok(None);
        };

        let committed = Self::committed(&mut tx, product_id).await?;
        let available = available_stock(product.stock, committed);
        let diff = new_quantity - existing.quantity;
        if diff > 0 {
            if !product.is_active {
                return Err(StockError::ProductUnavailable(product_id));
            }
            if available < diff {
                metrics::counter!("stock_reservations_rejected_total").increment(1);
                return Err(StockError::InsufficientStock {
                    product_id,
                    requested: diff,
                    available,
                });
            }
        }

        let row = sqlx::query(&format!(
            r#"
            UPDATE stock_reservations
            SET quantity = $2, updated_at = NOW()
            WHERE id = $1 AND status = $3
            RETURNING {RESERVATION_COLUMNS}
            "#
        ))
        .bind(existing.id.as_i64())
        .bind(new_quantity)
        .bind(ReservationStatus::RESERVED)
        .fetch_optional(&mut *tx)
        .await?;

        // Released or confirmed rows are history and keep their quantity.
        let Some(row) = row else {
            return Ok(None);
        };
        let reservation = Self::row_to_reservation(row)?;

        tx.commit().await?;

        Ok(Some(ReservationOutcome {
            reservation,
            available_stock: available_stock(product.stock, committed + diff),
        }))
    }

    async fn session_reservations(&self, session_id: &SessionId) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RESERVATION_COLUMNS}
            FROM stock_reservations
            WHERE session_id = $1
            ORDER BY id DESC
            "#
        ))
        .bind(session_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_reservation).collect()
    }

    async fn pending_confirmations(&self, limit: usize) -> Result<Vec<ReservationConfirmed>> {
        let rows = sqlx::query(
            r#"
            SELECT id, product_id, session_id, quantity, updated_at
            FROM stock_reservations
            WHERE status = $1 AND settled_at IS NULL
            ORDER BY updated_at ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(ReservationStatus::CONFIRMED)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_confirmation).collect()
    }

    #[tracing::instrument(skip(self))]
    async fn settle_confirmation(&self, reservation_id: ReservationId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT status, expires_at, settled_at FROM stock_reservations WHERE id = $1 FOR UPDATE",
        )
        .bind(reservation_id.as_i64())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StockError::ReservationNotFound(reservation_id))?;

        let status: String = row.try_get("status")?;
        let status = ReservationStatus::from_columns(
            &status,
            row.try_get("expires_at")?,
            row.try_get("settled_at")?,
        )?;
        if let ReservationStatus::Confirmed {
            settled_at: Some(_),
        } = status
        {
            return Ok(false);
        }
        status.settle(Utc::now())?;

        sqlx::query(
            "UPDATE stock_reservations SET settled_at = NOW(), updated_at = NOW() WHERE id = $1",
        )
        .bind(reservation_id.as_i64())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }
}
