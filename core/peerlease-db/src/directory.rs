//! The peer directory: persistent users, subscriptions and devices.
//!
//! Uses a single SQLite connection behind a mutex. Every call holds the lock
//! for its whole duration, and [`PeerDirectory::transaction`] holds it across
//! the caller's closure, so read-then-write sequences inside a transaction are
//! serialized against every other directory call in the process.

use crate::error::{DbError, DbResult};
use crate::models::{Device, NewDevice, NewSubscription, Subscription, User};
use crate::schema;
use chrono::{DateTime, Utc};
use peerlease_types::{DeviceId, PeerKey, SubscriptionId, SubscriptionStatus, UserId};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Params, Row, Transaction, TransactionBehavior};
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

const USER_COLUMNS: &str = "id, external_id, handle, created_at";
const SUBSCRIPTION_COLUMNS: &str =
    "id, user_id, device_limit, status, starts_at, ends_at, grace_period_ends_at, created_at";
const DEVICE_COLUMNS: &str =
    "id, user_id, subscription_id, name, public_key, assigned_ip, created_at, revoked_at";
const LIVE: &str = "('active', 'expiring', 'paused')";

/// Persistent store for users, subscriptions and devices backed by SQLite.
#[derive(Clone)]
pub struct PeerDirectory {
    conn: Arc<Mutex<Connection>>,
}

impl PeerDirectory {
    /// Opens (or creates) a directory at the given path.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DbError::Storage(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| DbError::sqlite("failed to open peer directory", e))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| DbError::sqlite("failed to set busy timeout", e))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
            .map_err(|e| DbError::sqlite("failed to enable WAL", e))?;
        info!("Opened peer directory at {}", path.display());
        Self::from_connection(conn)
    }

    /// Opens an in-memory directory (for testing).
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DbError::sqlite("failed to open in-memory peer directory", e))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> DbResult<Self> {
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DbError::Storage("peer directory lock poisoned".to_string()))
    }

    /// Runs `f` inside one IMMEDIATE transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back when it returns `Err`.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&DirectoryTx<'_>) -> Result<T, E>,
        E: From<DbError>,
    {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| DbError::sqlite("failed to begin transaction", e))?;
        let scoped = DirectoryTx { tx };
        let value = f(&scoped)?;
        scoped
            .tx
            .commit()
            .map_err(|e| DbError::sqlite("failed to commit transaction", e))?;
        Ok(value)
    }

    // ── Users ────────────────────────────────────────────────────

    /// Returns the user for an external identity, creating it on first
    /// contact and refreshing its handle otherwise.
    pub fn get_or_create_user(&self, external_id: i64, handle: &str) -> DbResult<User> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO users (external_id, handle, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(external_id) DO UPDATE SET handle = excluded.handle",
            params![external_id, handle, Utc::now().timestamp_millis()],
        )
        .map_err(|e| DbError::sqlite("failed to upsert user", e))?;
        queries::user_by_external_id(&conn, external_id)?
            .ok_or_else(|| DbError::NotFound(format!("user with external id {external_id}")))
    }

    /// Looks up a user by row id.
    pub fn user_by_id(&self, id: UserId) -> DbResult<Option<User>> {
        let conn = self.lock()?;
        queries::user_by_id(&conn, id)
    }

    /// Looks up a user by external identity.
    pub fn user_by_external_id(&self, external_id: i64) -> DbResult<Option<User>> {
        let conn = self.lock()?;
        queries::user_by_external_id(&conn, external_id)
    }

    // ── Subscriptions ────────────────────────────────────────────

    /// Returns the user's current subscription in a live status, if any.
    pub fn live_subscription(&self, user: UserId) -> DbResult<Option<Subscription>> {
        let conn = self.lock()?;
        queries::live_subscription(&conn, user)
    }

    /// Returns the user's most recent subscription in any status.
    pub fn latest_subscription(&self, user: UserId) -> DbResult<Option<Subscription>> {
        let conn = self.lock()?;
        queries::query_one(
            &conn,
            &format!(
                "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT 1"
            ),
            params![user.get()],
            subscription_from_row,
            "failed to query latest subscription",
        )
    }

    /// Looks up a subscription by row id.
    pub fn subscription_by_id(&self, id: SubscriptionId) -> DbResult<Option<Subscription>> {
        let conn = self.lock()?;
        queries::subscription_by_id(&conn, id)
    }

    /// Returns every subscription in a live status.
    pub fn live_subscriptions(&self) -> DbResult<Vec<Subscription>> {
        let conn = self.lock()?;
        queries::query_all(
            &conn,
            &format!(
                "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE status IN {LIVE} ORDER BY id"
            ),
            [],
            subscription_from_row,
            "failed to query live subscriptions",
        )
    }

    /// Inserts a subscription row.
    pub fn insert_subscription(&self, new: &NewSubscription) -> DbResult<Subscription> {
        let conn = self.lock()?;
        queries::insert_subscription(&conn, new)
    }

    /// Moves a subscription's end and makes it Active again.
    pub fn extend_subscription(
        &self,
        id: SubscriptionId,
        ends_at: DateTime<Utc>,
    ) -> DbResult<Subscription> {
        let conn = self.lock()?;
        queries::extend_subscription(&conn, id, ends_at)
    }

    /// Sets a subscription's status and grace-period end.
    pub fn update_subscription_status(
        &self,
        id: SubscriptionId,
        status: SubscriptionStatus,
        grace_period_ends_at: Option<DateTime<Utc>>,
    ) -> DbResult<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE subscriptions SET status = ?1, grace_period_ends_at = ?2 WHERE id = ?3",
                params![
                    status.as_str(),
                    grace_period_ends_at.map(|t| t.timestamp_millis()),
                    id.get()
                ],
            )
            .map_err(|e| DbError::sqlite("failed to update subscription status", e))?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("subscription {id}")));
        }
        debug!("Subscription {} -> {}", id, status);
        Ok(())
    }

    // ── Devices ──────────────────────────────────────────────────

    /// Inserts a device row in its own transaction.
    ///
    /// Fails with [`DbError::DeviceLimit`] when the subscription is full.
    pub fn create_device(&self, new: &NewDevice) -> DbResult<Device> {
        self.transaction(|tx| tx.insert_device(new))
    }

    /// Returns the non-revoked device holding `key`.
    pub fn active_device_by_key(&self, key: &PeerKey) -> DbResult<Option<Device>> {
        let conn = self.lock()?;
        queries::active_device_by_key(&conn, key)
    }

    /// Returns a user's non-revoked devices, oldest first.
    pub fn devices_for_user(&self, user: UserId) -> DbResult<Vec<Device>> {
        let conn = self.lock()?;
        queries::query_all(
            &conn,
            &format!(
                "SELECT {DEVICE_COLUMNS} FROM devices
                 WHERE user_id = ?1 AND revoked_at IS NULL ORDER BY id"
            ),
            params![user.get()],
            device_from_row,
            "failed to query devices",
        )
    }

    /// Counts the non-revoked devices of a subscription.
    pub fn count_active_devices(&self, subscription: SubscriptionId) -> DbResult<u32> {
        let conn = self.lock()?;
        queries::count_active_devices(&conn, subscription)
    }

    /// Marks a device revoked. Returns false if it was already revoked.
    pub fn revoke_device(&self, id: DeviceId) -> DbResult<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE devices SET revoked_at = ?1 WHERE id = ?2 AND revoked_at IS NULL",
                params![Utc::now().timestamp_millis(), id.get()],
            )
            .map_err(|e| DbError::sqlite("failed to revoke device", e))?;
        if changed == 0 && queries::device_by_id(&conn, id)?.is_none() {
            return Err(DbError::NotFound(format!("device {id}")));
        }
        Ok(changed > 0)
    }

    /// Returns non-revoked devices whose subscription is Expired with a
    /// grace-period end strictly before `before`.
    pub fn devices_to_clean_up(&self, before: DateTime<Utc>) -> DbResult<Vec<Device>> {
        let conn = self.lock()?;
        queries::query_all(
            &conn,
            "SELECT d.id, d.user_id, d.subscription_id, d.name, d.public_key, d.assigned_ip,
                    d.created_at, d.revoked_at
             FROM devices d
             JOIN subscriptions s ON d.subscription_id = s.id
             WHERE s.status = 'expired'
               AND s.grace_period_ends_at < ?1
               AND d.revoked_at IS NULL
             ORDER BY d.id",
            params![before.timestamp_millis()],
            device_from_row,
            "failed to query expired devices",
        )
    }
}

/// A directory view bound to one open transaction.
pub struct DirectoryTx<'conn> {
    tx: Transaction<'conn>,
}

impl DirectoryTx<'_> {
    /// Returns the assigned addresses of all non-revoked devices.
    ///
    /// Rows whose address does not parse are skipped with a warning.
    pub fn active_addresses(&self) -> DbResult<Vec<Ipv4Addr>> {
        let raw: Vec<String> = queries::query_all(
            &self.tx,
            "SELECT assigned_ip FROM devices WHERE revoked_at IS NULL",
            [],
            |row| row.get(0),
            "failed to query assigned addresses",
        )?;
        Ok(raw
            .into_iter()
            .filter_map(|ip| match ip.parse::<Ipv4Addr>() {
                Ok(addr) => Some(addr),
                Err(e) => {
                    warn!("Ignoring unparsable assigned address {:?}: {}", ip, e);
                    None
                }
            })
            .collect())
    }

    /// Returns the non-revoked device holding `key`.
    pub fn active_device_by_key(&self, key: &PeerKey) -> DbResult<Option<Device>> {
        queries::active_device_by_key(&self.tx, key)
    }

    /// Inserts a device row, enforcing the subscription's device limit.
    pub fn insert_device(&self, new: &NewDevice) -> DbResult<Device> {
        queries::insert_device(&self.tx, new)
    }

    /// Counts the non-revoked devices of a subscription.
    pub fn count_active_devices(&self, subscription: SubscriptionId) -> DbResult<u32> {
        queries::count_active_devices(&self.tx, subscription)
    }

    /// Looks up a subscription by row id.
    pub fn subscription_by_id(&self, id: SubscriptionId) -> DbResult<Option<Subscription>> {
        queries::subscription_by_id(&self.tx, id)
    }

    /// Returns the user's live subscription.
    pub fn live_subscription(&self, user: UserId) -> DbResult<Option<Subscription>> {
        queries::live_subscription(&self.tx, user)
    }

    /// Looks up a user by row id.
    pub fn user_by_id(&self, id: UserId) -> DbResult<Option<User>> {
        queries::user_by_id(&self.tx, id)
    }

    /// Inserts a subscription row.
    pub fn insert_subscription(&self, new: &NewSubscription) -> DbResult<Subscription> {
        queries::insert_subscription(&self.tx, new)
    }

    /// Moves a subscription's end and makes it Active again.
    pub fn extend_subscription(
        &self,
        id: SubscriptionId,
        ends_at: DateTime<Utc>,
    ) -> DbResult<Subscription> {
        queries::extend_subscription(&self.tx, id, ends_at)
    }
}

mod queries {
    use super::*;

    pub(super) fn query_one<T, P, F>(
        conn: &Connection,
        sql: &str,
        params: P,
        map: F,
        context: &str,
    ) -> DbResult<Option<T>>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        conn.query_row(sql, params, map)
            .optional()
            .map_err(|e| DbError::sqlite(context, e))
    }

    pub(super) fn query_all<T, P, F>(
        conn: &Connection,
        sql: &str,
        params: P,
        map: F,
        context: &str,
    ) -> DbResult<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = conn.prepare(sql).map_err(|e| DbError::sqlite(context, e))?;
        let rows = stmt
            .query_map(params, map)
            .map_err(|e| DbError::sqlite(context, e))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| DbError::sqlite(context, e))?);
        }
        Ok(out)
    }

    pub(super) fn user_by_id(conn: &Connection, id: UserId) -> DbResult<Option<User>> {
        query_one(
            conn,
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id.get()],
            user_from_row,
            "failed to query user",
        )
    }

    pub(super) fn user_by_external_id(conn: &Connection, external_id: i64) -> DbResult<Option<User>> {
        query_one(
            conn,
            &format!("SELECT {USER_COLUMNS} FROM users WHERE external_id = ?1"),
            params![external_id],
            user_from_row,
            "failed to query user",
        )
    }

    pub(super) fn subscription_by_id(
        conn: &Connection,
        id: SubscriptionId,
    ) -> DbResult<Option<Subscription>> {
        query_one(
            conn,
            &format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = ?1"),
            params![id.get()],
            subscription_from_row,
            "failed to query subscription",
        )
    }

    pub(super) fn live_subscription(
        conn: &Connection,
        user: UserId,
    ) -> DbResult<Option<Subscription>> {
        query_one(
            conn,
            &format!(
                "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
                 WHERE user_id = ?1 AND status IN {LIVE}
                 ORDER BY created_at DESC, id DESC LIMIT 1"
            ),
            params![user.get()],
            subscription_from_row,
            "failed to query live subscription",
        )
    }

    pub(super) fn insert_subscription(
        conn: &Connection,
        new: &NewSubscription,
    ) -> DbResult<Subscription> {
        new.validate()?;
        conn.execute(
            "INSERT INTO subscriptions
                (user_id, device_limit, status, starts_at, ends_at, grace_period_ends_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                new.user_id.get(),
                new.device_limit,
                new.status.as_str(),
                new.starts_at.timestamp_millis(),
                new.ends_at.timestamp_millis(),
                new.grace_period_ends_at.map(|t| t.timestamp_millis()),
                Utc::now().timestamp_millis(),
            ],
        )
        .map_err(|e| DbError::sqlite("failed to create subscription", e))?;
        let id = SubscriptionId::new(conn.last_insert_rowid());
        subscription_by_id(conn, id)?
            .ok_or_else(|| DbError::NotFound(format!("subscription {id} after insert")))
    }

    pub(super) fn extend_subscription(
        conn: &Connection,
        id: SubscriptionId,
        ends_at: DateTime<Utc>,
    ) -> DbResult<Subscription> {
        let changed = conn
            .execute(
                "UPDATE subscriptions
                 SET ends_at = ?1, grace_period_ends_at = NULL, status = 'active'
                 WHERE id = ?2",
                params![ends_at.timestamp_millis(), id.get()],
            )
            .map_err(|e| DbError::sqlite("failed to extend subscription", e))?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("subscription {id}")));
        }
        subscription_by_id(conn, id)?
            .ok_or_else(|| DbError::NotFound(format!("subscription {id} after extend")))
    }

    pub(super) fn device_by_id(conn: &Connection, id: DeviceId) -> DbResult<Option<Device>> {
        query_one(
            conn,
            &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE id = ?1"),
            params![id.get()],
            device_from_row,
            "failed to query device",
        )
    }

    pub(super) fn active_device_by_key(
        conn: &Connection,
        key: &PeerKey,
    ) -> DbResult<Option<Device>> {
        query_one(
            conn,
            &format!(
                "SELECT {DEVICE_COLUMNS} FROM devices
                 WHERE public_key = ?1 AND revoked_at IS NULL"
            ),
            params![key.to_base64()],
            device_from_row,
            "failed to query device",
        )
    }

    pub(super) fn count_active_devices(
        conn: &Connection,
        subscription: SubscriptionId,
    ) -> DbResult<u32> {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM devices WHERE subscription_id = ?1 AND revoked_at IS NULL",
                params![subscription.get()],
                |row| row.get(0),
            )
            .map_err(|e| DbError::sqlite("failed to count devices", e))?;
        u32::try_from(count).map_err(|e| DbError::Corrupt(format!("device count {count}: {e}")))
    }

    /// Callers must hold a write transaction so the count stays valid until
    /// the insert.
    pub(super) fn insert_device(conn: &Connection, new: &NewDevice) -> DbResult<Device> {
        let sub = subscription_by_id(conn, new.subscription_id)?
            .ok_or_else(|| DbError::NotFound(format!("subscription {}", new.subscription_id)))?;
        let current = count_active_devices(conn, sub.id)?;
        if current >= sub.device_limit {
            return Err(DbError::DeviceLimit {
                current,
                limit: sub.device_limit,
            });
        }
        conn.execute(
            "INSERT INTO devices
                (user_id, subscription_id, name, public_key, assigned_ip, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                new.user_id.get(),
                new.subscription_id.get(),
                new.name,
                new.public_key.to_base64(),
                new.assigned_address.to_string(),
                Utc::now().timestamp_millis(),
            ],
        )
        .map_err(|e| DbError::sqlite("failed to insert device", e))?;
        let id = DeviceId::new(conn.last_insert_rowid());
        device_by_id(conn, id)?.ok_or_else(|| DbError::NotFound(format!("device {id} after insert")))
    }
}

fn conversion(idx: usize, ty: Type, msg: String) -> rusqlite::Error {
    let err: Box<dyn std::error::Error + Send + Sync> = msg.into();
    rusqlite::Error::FromSqlConversionFailure(idx, ty, err)
}

fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| conversion(idx, Type::Integer, format!("timestamp out of range: {ms}")))
}

fn opt_time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let ms: Option<i64> = row.get(idx)?;
    ms.map(|ms| {
        DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| conversion(idx, Type::Integer, format!("timestamp out of range: {ms}")))
    })
    .transpose()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId::new(row.get(0)?),
        external_id: row.get(1)?,
        handle: row.get(2)?,
        created_at: time_at(row, 3)?,
    })
}

fn subscription_from_row(row: &Row<'_>) -> rusqlite::Result<Subscription> {
    let limit: i64 = row.get(2)?;
    let status: String = row.get(3)?;
    Ok(Subscription {
        id: SubscriptionId::new(row.get(0)?),
        user_id: UserId::new(row.get(1)?),
        device_limit: u32::try_from(limit)
            .map_err(|e| conversion(2, Type::Integer, format!("device limit {limit}: {e}")))?,
        status: status
            .parse::<SubscriptionStatus>()
            .map_err(|e| conversion(3, Type::Text, e.to_string()))?,
        starts_at: time_at(row, 4)?,
        ends_at: time_at(row, 5)?,
        grace_period_ends_at: opt_time_at(row, 6)?,
        created_at: time_at(row, 7)?,
    })
}

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<Device> {
    let key: String = row.get(4)?;
    let ip: String = row.get(5)?;
    Ok(Device {
        id: DeviceId::new(row.get(0)?),
        user_id: UserId::new(row.get(1)?),
        subscription_id: SubscriptionId::new(row.get(2)?),
        name: row.get(3)?,
        public_key: PeerKey::parse(&key).map_err(|e| conversion(4, Type::Text, e.to_string()))?,
        assigned_address: ip
            .parse::<Ipv4Addr>()
            .map_err(|e| conversion(5, Type::Text, format!("{ip:?}: {e}")))?,
        created_at: time_at(row, 6)?,
        revoked_at: opt_time_at(row, 7)?,
    })
}
