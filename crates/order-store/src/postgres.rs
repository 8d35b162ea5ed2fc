use std::collections::HashMap;

use async_trait::async_trait;
use common::{AlertId, OrderId, ProfileId, RewardId, UserId, WebhookLogId};
use domain::{
    Account, AlertChannels, DataVolume, DomainError, LineItem, Money, NewOrder, NewUsageAlert,
    Order, OrderStatus, ProfileStatus, ProfileUpsert, ProvisionedProfile, ReferralReward,
    ReferralTerms, TriggeredAlert, UsageAlert, WebhookLog, WebhookSource,
};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Result, StoreError,
    store::{Completion, OrderStore, UpsertOutcome, UsageUpdate},
};

const ORDER_COLUMNS: &str = "id, transaction_id, order_no, user_id, amount, currency, credits_used, status, created_at, updated_at";

const PROFILE_COLUMNS: &str = "id, order_id, esim_tran_no, iccid, qr_code_url, activation_code, status, used_volume, total_volume, expires_at, activated_at, created_at, updated_at";

const ALERT_COLUMNS: &str =
    "id, profile_id, threshold, notify_email, notify_push, triggered, triggered_at, created_at";

const REWARD_COLUMNS: &str =
    "id, referrer_id, referred_id, amount, status, order_id, created_at, credited_at";

const WEBHOOK_COLUMNS: &str =
    "id, source, kind, payload, processed, received_at, processed_at";

/// How many times a serializable completion is retried before giving up.
const MAX_SERIALIZATION_RETRIES: u32 = 3;

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
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Converts order rows into orders, loading their line items in one query.
    async fn with_items(conn: &mut PgConnection, rows: Vec<PgRow>) -> Result<Vec<Order>> {
        let mut orders = rows
            .into_iter()
            .map(row_to_order)
            .collect::<Result<Vec<_>>>()?;
        if orders.is_empty() {
            return Ok(orders);
        }

        let ids: Vec<Uuid> = orders.iter().map(|o| o.id.as_uuid()).collect();
        let item_rows = sqlx::query(
            r#"
            SELECT order_id, package_code, name, unit_price, quantity, volume, duration, duration_unit, location_code
            FROM line_items
            WHERE order_id = ANY($1)
            ORDER BY order_id, position
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *conn)
        .await?;

        let mut items: HashMap<Uuid, Vec<LineItem>> = HashMap::new();
        for row in item_rows {
            let order_id: Uuid = row.try_get("order_id")?;
            items.entry(order_id).or_default().push(row_to_line_item(&row)?);
        }
        for order in &mut orders {
            order.items = items.remove(&order.id.as_uuid()).unwrap_or_default();
        }
        Ok(orders)
    }

    async fn fetch_order(conn: &mut PgConnection, id: OrderId) -> Result<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let rows = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_all(&mut *conn)
            .await?;
        Ok(Self::with_items(conn, rows).await?.into_iter().next())
    }

    /// Loads the orders whose text `column` equals `value`, newest first.
    async fn fetch_orders_by(&self, column: &str, value: &str) -> Result<Vec<Order>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE {column} = $1 ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(value)
            .fetch_all(&mut *conn)
            .await?;
        Self::with_items(&mut *conn, rows).await
    }

    async fn fetch_balance(conn: &mut PgConnection, user_id: UserId) -> Result<Money> {
        let balance: Option<i64> =
            sqlx::query_scalar("SELECT credit_balance FROM accounts WHERE user_id = $1")
                .bind(user_id.as_uuid())
                .fetch_optional(&mut *conn)
                .await?;
        Ok(Money::from_cents(balance.unwrap_or(0)))
    }

    /// Takes `amount` from the user's balance, failing if it does not cover it.
    async fn debit_account(conn: &mut PgConnection, user_id: UserId, amount: Money) -> Result<()> {
        let debited = sqlx::query(
            r#"
            UPDATE accounts
            SET credit_balance = credit_balance - $2, updated_at = NOW()
            WHERE user_id = $1 AND credit_balance >= $2
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(amount.cents())
        .execute(&mut *conn)
        .await?;

        if debited.rows_affected() == 0 {
            let balance = Self::fetch_balance(&mut *conn, user_id).await?;
            return Err(StoreError::InsufficientCredit {
                user_id,
                balance,
                required: amount,
            });
        }
        Ok(())
    }

    /// Moves an order to `to` if that transition is legal from its current
    /// status, returning its credit to the owner in the same transaction.
    async fn close_with_refund(&self, id: OrderId, to: OrderStatus) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT user_id, credits_used, status FROM orders WHERE id = $1 FOR UPDATE",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::OrderNotFound(id))?;

        let status: OrderStatus = row.try_get::<String, _>("status")?.parse()?;
        if !status.can_transition_to(to) {
            tx.rollback().await?;
            return Ok(false);
        }

        let credits_used = Money::from_cents(row.try_get("credits_used")?);
        if credits_used.is_positive() {
            let user_id = UserId::from_uuid(row.try_get("user_id")?);
            Self::credit_account(&mut *tx, user_id, credits_used).await?;
        }

        sqlx::query("UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id.as_uuid())
            .bind(to.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn credit_account(conn: &mut PgConnection, user_id: UserId, amount: Money) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (user_id, credit_balance)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE
            SET credit_balance = accounts.credit_balance + EXCLUDED.credit_balance,
                updated_at = NOW()
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(amount.cents())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Fires every untriggered alert of a profile that the given usage reaches.
    ///
    /// The `NOT triggered` guard is re-evaluated after row locks are
    /// acquired, so concurrent updates cannot fire the same alert twice.
    async fn fire_alerts(
        conn: &mut PgConnection,
        profile: &ProvisionedProfile,
    ) -> Result<Vec<TriggeredAlert>> {
        let sql = format!(
            r#"
            UPDATE usage_alerts
            SET triggered = TRUE, triggered_at = NOW()
            WHERE profile_id = $1
              AND NOT triggered
              AND $3 > 0
              AND $2::numeric * 100 >= threshold::numeric * $3::numeric
            RETURNING {ALERT_COLUMNS}
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(profile.id.as_uuid())
            .bind(to_db_volume("used_volume", profile.used_volume)?)
            .bind(to_db_volume("total_volume", profile.total_volume)?)
            .fetch_all(&mut *conn)
            .await?;

        let mut fired = rows
            .into_iter()
            .map(|row| {
                Ok(TriggeredAlert {
                    alert: row_to_alert(&row)?,
                    profile: profile.clone(),
                    percent_used: profile.percent_used(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        fired.sort_by_key(|t| t.alert.threshold);
        Ok(fired)
    }

    async fn try_complete(&self, id: OrderId, terms: &ReferralTerms) -> Result<Completion> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'COMPLETED', updated_at = NOW()
            WHERE id = $1 AND status = 'PROCESSING'
            "#,
        )
        .bind(id.as_uuid())
        .execute(&mut *tx)
        .await?;

        let order = Self::fetch_order(&mut *tx, id)
            .await?
            .ok_or(StoreError::OrderNotFound(id))?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(Completion {
                transitioned: false,
                order,
                referral: None,
            });
        }

        let prior_completed: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM orders WHERE user_id = $1 AND id <> $2 AND status = 'COMPLETED'",
        )
        .bind(order.user_id.as_uuid())
        .bind(id.as_uuid())
        .fetch_one(&mut *tx)
        .await?;

        let mut referral = None;
        if prior_completed == 0 {
            let sql = format!(
                r#"
                UPDATE referral_rewards
                SET status = 'CREDITED', order_id = $2, credited_at = NOW()
                WHERE referred_id = $1 AND status = 'PENDING'
                RETURNING {REWARD_COLUMNS}
                "#
            );
            let row = sqlx::query(&sql)
                .bind(order.user_id.as_uuid())
                .bind(id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;

            if let Some(row) = row {
                let reward = row_to_reward(&row)?;
                Self::credit_account(&mut *tx, reward.referrer_id, reward.amount).await?;
                Self::credit_account(&mut *tx, reward.referred_id, terms.welcome_bonus).await?;
                referral = Some(reward);
            }
        }

        tx.commit().await?;
        Ok(Completion {
            transitioned: true,
            order,
            referral,
        })
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn create_order(&self, order: NewOrder) -> Result<Order> {
        if order.credits.is_negative() || order.credits > order.amount {
            return Err(DomainError::InvalidCredit(order.credits.cents()).into());
        }

        let mut tx = self.pool.begin().await?;

        let created_at: chrono::DateTime<chrono::Utc> = sqlx::query_scalar(
            r#"
            INSERT INTO orders (id, transaction_id, user_id, amount, currency, credits_used, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'PENDING_PAYMENT')
            RETURNING created_at
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(&order.transaction_id)
        .bind(order.user_id.as_uuid())
        .bind(order.amount.cents())
        .bind(&order.currency)
        .bind(order.credits.cents())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_transaction_id")
            {
                return StoreError::Conflict(format!(
                    "transaction id {} already used",
                    order.transaction_id
                ));
            }
            StoreError::Database(e)
        })?;

        if order.credits.is_positive() {
            Self::debit_account(&mut *tx, order.user_id, order.credits).await?;
        }

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO line_items (order_id, position, package_code, name, unit_price, quantity, volume, duration, duration_unit, location_code)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(order.id.as_uuid())
            .bind(to_db_int::<i32>("position", position as u64)?)
            .bind(&item.package_code)
            .bind(&item.name)
            .bind(item.unit_price.cents())
            .bind(to_db_int::<i32>("quantity", u64::from(item.quantity))?)
            .bind(to_db_volume("volume", item.volume)?)
            .bind(to_db_int::<i32>("duration", u64::from(item.duration))?)
            .bind(item.duration_unit.as_str())
            .bind(&item.location_code)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let mut order = Order::from_new(order, created_at);
        order.updated_at = created_at;
        Ok(order)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_order(&mut *conn, id).await
    }

    async fn find_order_by_order_no(&self, order_no: &str) -> Result<Option<Order>> {
        let orders = self.fetch_orders_by("order_no", order_no).await?;
        Ok(orders.into_iter().next())
    }

    async fn find_order_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Order>> {
        let orders = self
            .fetch_orders_by("transaction_id", transaction_id)
            .await?;
        Ok(orders.into_iter().next())
    }

    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .fetch_all(&mut *conn)
            .await?;
        Self::with_items(&mut *conn, rows).await
    }

    async fn transition_status(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool> {
        from.ensure_transition(to)?;

        let result = sqlx::query(
            "UPDATE orders SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2",
        )
        .bind(id.as_uuid())
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM orders WHERE id = $1)")
            .bind(id.as_uuid())
            .fetch_one(&self.pool)
            .await?;
        if exists {
            Ok(false)
        } else {
            Err(StoreError::OrderNotFound(id))
        }
    }

    async fn mark_paid(&self, id: OrderId) -> Result<bool> {
        self.transition_status(id, OrderStatus::PendingPayment, OrderStatus::Paid)
            .await
    }

    async fn mark_processing(&self, id: OrderId, order_no: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'PROCESSING', order_no = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'PAID' AND order_no IS NULL
            "#,
        )
        .bind(id.as_uuid())
        .bind(order_no)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_order_no")
            {
                return StoreError::Conflict(format!("order number {order_no} already recorded"));
            }
            StoreError::Database(e)
        })?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.get_order(id).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::OrderNotFound(id)),
        }
    }

    async fn cancel_order(&self, id: OrderId) -> Result<bool> {
        self.close_with_refund(id, OrderStatus::Cancelled).await
    }

    async fn fail_order(&self, id: OrderId) -> Result<bool> {
        self.close_with_refund(id, OrderStatus::Failed).await
    }

    async fn complete_order(&self, id: OrderId, terms: &ReferralTerms) -> Result<Completion> {
        let mut attempt = 0;
        loop {
            match self.try_complete(id, terms).await {
                Err(e) if is_serialization_failure(&e) && attempt < MAX_SERIALIZATION_RETRIES => {
                    attempt += 1;
                    metrics::counter!("order_store_serialization_retries_total").increment(1);
                    tracing::warn!(%id, attempt, "completion serialization conflict, retrying");
                }
                result => return result,
            }
        }
    }

    async fn upsert_profiles(
        &self,
        order_id: OrderId,
        profiles: Vec<ProfileUpsert>,
    ) -> Result<UpsertOutcome> {
        let mut tx = self.pool.begin().await?;

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM orders WHERE id = $1)")
            .bind(order_id.as_uuid())
            .fetch_one(&mut *tx)
            .await?;
        if !exists {
            return Err(StoreError::OrderNotFound(order_id));
        }

        let sql = format!(
            r#"
            INSERT INTO provisioned_profiles
                (id, order_id, esim_tran_no, iccid, qr_code_url, activation_code, status,
                 used_volume, total_volume, expires_at, activated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT ON CONSTRAINT unique_esim_tran_no DO UPDATE
            SET iccid = EXCLUDED.iccid,
                qr_code_url = EXCLUDED.qr_code_url,
                activation_code = EXCLUDED.activation_code,
                status = EXCLUDED.status,
                used_volume = EXCLUDED.used_volume,
                total_volume = EXCLUDED.total_volume,
                expires_at = EXCLUDED.expires_at,
                activated_at = EXCLUDED.activated_at,
                updated_at = NOW()
            WHERE provisioned_profiles.order_id = EXCLUDED.order_id
            RETURNING {PROFILE_COLUMNS}, (xmax = 0) AS inserted
            "#
        );

        let mut outcome = UpsertOutcome::default();
        for upsert in profiles {
            let esim_tran_no = upsert.esim_tran_no.clone();
            let row = sqlx::query(&sql)
                .bind(Uuid::new_v4())
                .bind(order_id.as_uuid())
                .bind(&upsert.esim_tran_no)
                .bind(&upsert.iccid)
                .bind(&upsert.qr_code_url)
                .bind(&upsert.activation_code)
                .bind(upsert.status.as_str())
                .bind(to_db_volume("used_volume", upsert.used_volume)?)
                .bind(to_db_volume("total_volume", upsert.total_volume)?)
                .bind(upsert.expires_at)
                .bind(upsert.activated_at)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| {
                    StoreError::Conflict(format!(
                        "profile {esim_tran_no} belongs to another order"
                    ))
                })?;

            let profile = row_to_profile(&row)?;
            if row.try_get::<bool, _>("inserted")? {
                outcome.inserted += 1;
            }
            outcome
                .triggered
                .extend(Self::fire_alerts(&mut *tx, &profile).await?);
            outcome.profiles.push(profile);
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn list_profiles(&self, order_id: OrderId) -> Result<Vec<ProvisionedProfile>> {
        let sql = format!(
            "SELECT {PROFILE_COLUMNS} FROM provisioned_profiles WHERE order_id = $1 ORDER BY created_at, esim_tran_no"
        );
        let rows = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_profile).collect()
    }

    async fn get_profile(&self, esim_tran_no: &str) -> Result<Option<ProvisionedProfile>> {
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM provisioned_profiles WHERE esim_tran_no = $1");
        let row = sqlx::query(&sql)
            .bind(esim_tran_no)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_profile).transpose()
    }

    async fn record_usage(
        &self,
        esim_tran_no: &str,
        used: DataVolume,
        total: Option<DataVolume>,
    ) -> Result<UsageUpdate> {
        let total = total
            .map(|t| to_db_volume("total_volume", t))
            .transpose()?;

        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            UPDATE provisioned_profiles
            SET used_volume = $2,
                total_volume = COALESCE($3, total_volume),
                updated_at = NOW()
            WHERE esim_tran_no = $1
            RETURNING {PROFILE_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(esim_tran_no)
            .bind(to_db_volume("used_volume", used)?)
            .bind(total)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::ProfileNotFound(esim_tran_no.to_string()))?;

        let profile = row_to_profile(&row)?;
        let triggered = Self::fire_alerts(&mut *tx, &profile).await?;

        tx.commit().await?;
        Ok(UsageUpdate { profile, triggered })
    }

    async fn update_profile_status(
        &self,
        esim_tran_no: &str,
        status: ProfileStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE provisioned_profiles SET status = $2, updated_at = NOW() WHERE esim_tran_no = $1",
        )
        .bind(esim_tran_no)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn create_usage_alert(&self, alert: NewUsageAlert) -> Result<UsageAlert> {
        let sql = format!(
            r#"
            INSERT INTO usage_alerts (id, profile_id, threshold, notify_email, notify_push)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {ALERT_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(AlertId::new().as_uuid())
            .bind(alert.profile_id.as_uuid())
            .bind(i16::from(alert.threshold))
            .bind(alert.channels.email)
            .bind(alert.channels.push)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.is_foreign_key_violation()
                {
                    return StoreError::ProfileNotFound(alert.profile_id.to_string());
                }
                StoreError::Database(e)
            })?;
        row_to_alert(&row)
    }

    async fn list_usage_alerts(&self, profile_id: ProfileId) -> Result<Vec<UsageAlert>> {
        let sql =
            format!("SELECT {ALERT_COLUMNS} FROM usage_alerts WHERE profile_id = $1 ORDER BY threshold");
        let rows = sqlx::query(&sql)
            .bind(profile_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_alert).collect()
    }

    async fn create_referral_reward(
        &self,
        referrer_id: UserId,
        referred_id: UserId,
        amount: Money,
    ) -> Result<ReferralReward> {
        if referrer_id == referred_id {
            return Err(StoreError::Conflict("user cannot refer themselves".to_string()));
        }

        let sql = format!(
            r#"
            INSERT INTO referral_rewards (id, referrer_id, referred_id, amount, status)
            VALUES ($1, $2, $3, $4, 'PENDING')
            RETURNING {REWARD_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(RewardId::new().as_uuid())
            .bind(referrer_id.as_uuid())
            .bind(referred_id.as_uuid())
            .bind(amount.cents())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("unique_pending_referral")
                {
                    return StoreError::Conflict(format!(
                        "user {referred_id} already has a pending referral reward"
                    ));
                }
                StoreError::Database(e)
            })?;
        row_to_reward(&row)
    }

    async fn find_referral_reward(&self, referred_id: UserId) -> Result<Option<ReferralReward>> {
        let sql = format!(
            "SELECT {REWARD_COLUMNS} FROM referral_rewards WHERE referred_id = $1 ORDER BY created_at DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(referred_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_reward).transpose()
    }

    async fn get_account(&self, user_id: UserId) -> Result<Account> {
        let mut conn = self.pool.acquire().await?;
        Ok(Account {
            user_id,
            credit_balance: Self::fetch_balance(&mut *conn, user_id).await?,
        })
    }

    async fn adjust_credit(&self, user_id: UserId, delta: Money) -> Result<Account> {
        let result: std::result::Result<i64, sqlx::Error> = sqlx::query_scalar(
            r#"
            INSERT INTO accounts (user_id, credit_balance)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE
            SET credit_balance = accounts.credit_balance + EXCLUDED.credit_balance,
                updated_at = NOW()
            RETURNING credit_balance
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(delta.cents())
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(balance) => Ok(Account {
                user_id,
                credit_balance: Money::from_cents(balance),
            }),
            // The balance CHECK rejects any update that would go below zero.
            Err(sqlx::Error::Database(db_err)) if db_err.is_check_violation() => {
                Err(StoreError::InsufficientCredit {
                    user_id,
                    balance: self.get_account(user_id).await?.credit_balance,
                    required: -delta,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn append_webhook_log(
        &self,
        source: WebhookSource,
        kind: &str,
        payload: &str,
    ) -> Result<WebhookLog> {
        let sql = format!(
            r#"
            INSERT INTO webhook_logs (id, source, kind, payload)
            VALUES ($1, $2, $3, $4)
            RETURNING {WEBHOOK_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(WebhookLogId::new().as_uuid())
            .bind(source.as_str())
            .bind(kind)
            .bind(payload)
            .fetch_one(&self.pool)
            .await?;
        row_to_webhook_log(&row)
    }

    async fn mark_webhook_processed(&self, id: WebhookLogId) -> Result<()> {
        sqlx::query(
            "UPDATE webhook_logs SET processed = TRUE, processed_at = NOW() WHERE id = $1 AND NOT processed",
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_unprocessed_webhooks(&self, source: WebhookSource) -> Result<Vec<WebhookLog>> {
        let sql = format!(
            "SELECT {WEBHOOK_COLUMNS} FROM webhook_logs WHERE source = $1 AND NOT processed ORDER BY received_at"
        );
        let rows = sqlx::query(&sql)
            .bind(source.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_webhook_log).collect()
    }
}

fn is_serialization_failure(err: &StoreError) -> bool {
    match err {
        StoreError::Database(sqlx::Error::Database(db_err)) => {
            matches!(db_err.code().as_deref(), Some("40001") | Some("40P01"))
        }
        _ => false,
    }
}

fn to_db_volume(field: &'static str, volume: DataVolume) -> Result<i64> {
    to_db_int(field, volume.bytes())
}

fn to_db_int<T: TryFrom<u64>>(field: &'static str, value: u64) -> Result<T> {
    T::try_from(value).map_err(|_| StoreError::OutOfRange {
        field,
        value: value.to_string(),
    })
}

fn from_db_volume(field: &'static str, value: i64) -> Result<DataVolume> {
    u64::try_from(value)
        .map(DataVolume::from_bytes)
        .map_err(|_| StoreError::OutOfRange {
            field,
            value: value.to_string(),
        })
}

fn from_db_u32(field: &'static str, value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::OutOfRange {
        field,
        value: value.to_string(),
    })
}

fn row_to_order(row: PgRow) -> Result<Order> {
    Ok(Order {
        id: OrderId::from_uuid(row.try_get("id")?),
        transaction_id: row.try_get("transaction_id")?,
        order_no: row.try_get("order_no")?,
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        amount: Money::from_cents(row.try_get("amount")?),
        currency: row.try_get("currency")?,
        credits_used: Money::from_cents(row.try_get("credits_used")?),
        status: row.try_get::<String, _>("status")?.parse()?,
        items: Vec::new(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_line_item(row: &PgRow) -> Result<LineItem> {
    Ok(LineItem {
        package_code: row.try_get("package_code")?,
        name: row.try_get("name")?,
        unit_price: Money::from_cents(row.try_get("unit_price")?),
        quantity: from_db_u32("quantity", row.try_get("quantity")?)?,
        volume: from_db_volume("volume", row.try_get("volume")?)?,
        duration: from_db_u32("duration", row.try_get("duration")?)?,
        duration_unit: row.try_get::<String, _>("duration_unit")?.parse()?,
        location_code: row.try_get("location_code")?,
    })
}

fn row_to_profile(row: &PgRow) -> Result<ProvisionedProfile> {
    Ok(ProvisionedProfile {
        id: ProfileId::from_uuid(row.try_get("id")?),
        order_id: OrderId::from_uuid(row.try_get("order_id")?),
        esim_tran_no: row.try_get("esim_tran_no")?,
        iccid: row.try_get("iccid")?,
        qr_code_url: row.try_get("qr_code_url")?,
        activation_code: row.try_get("activation_code")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        used_volume: from_db_volume("used_volume", row.try_get("used_volume")?)?,
        total_volume: from_db_volume("total_volume", row.try_get("total_volume")?)?,
        expires_at: row.try_get("expires_at")?,
        activated_at: row.try_get("activated_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_alert(row: &PgRow) -> Result<UsageAlert> {
    let threshold: i16 = row.try_get("threshold")?;
    Ok(UsageAlert {
        id: AlertId::from_uuid(row.try_get("id")?),
        profile_id: ProfileId::from_uuid(row.try_get("profile_id")?),
        threshold: u8::try_from(threshold).map_err(|_| StoreError::OutOfRange {
            field: "threshold",
            value: threshold.to_string(),
        })?,
        channels: AlertChannels {
            email: row.try_get("notify_email")?,
            push: row.try_get("notify_push")?,
        },
        triggered: row.try_get("triggered")?,
        triggered_at: row.try_get("triggered_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_reward(row: &PgRow) -> Result<ReferralReward> {
    Ok(ReferralReward {
        id: RewardId::from_uuid(row.try_get("id")?),
        referrer_id: UserId::from_uuid(row.try_get("referrer_id")?),
        referred_id: UserId::from_uuid(row.try_get("referred_id")?),
        amount: Money::from_cents(row.try_get("amount")?),
        status: row.try_get::<String, _>("status")?.parse()?,
        order_id: row
            .try_get::<Option<Uuid>, _>("order_id")?
            .map(OrderId::from_uuid),
        created_at: row.try_get("created_at")?,
        credited_at: row.try_get("credited_at")?,
    })
}

fn row_to_webhook_log(row: &PgRow) -> Result<WebhookLog> {
    Ok(WebhookLog {
        id: WebhookLogId::from_uuid(row.try_get("id")?),
        source: row.try_get::<String, _>("source")?.parse()?,
        kind: row.try_get("kind")?,
        payload: row.try_get("payload")?,
        processed: row.try_get("processed")?,
        received_at: row.try_get("received_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}
