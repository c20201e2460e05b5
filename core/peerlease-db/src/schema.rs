//! Schema migrations.
//!
//! Every statement is idempotent; the whole list runs on each open.

use crate::error::{DbError, DbResult};
use rusqlite::Connection;

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "create_users",
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            external_id INTEGER NOT NULL UNIQUE,
            handle TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );",
    ),
    (
        "create_subscriptions",
        "CREATE TABLE IF NOT EXISTS subscriptions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id),
            device_limit INTEGER NOT NULL CHECK (device_limit >= 1),
            status TEXT NOT NULL CHECK (status IN ('active', 'expiring', 'paused', 'expired')),
            starts_at INTEGER NOT NULL,
            ends_at INTEGER NOT NULL,
            grace_period_ends_at INTEGER,
            created_at INTEGER NOT NULL,
            CHECK (ends_at > starts_at),
            CHECK (grace_period_ends_at IS NULL OR grace_period_ends_at > ends_at)
        );",
    ),
    (
        "create_devices",
        "CREATE TABLE IF NOT EXISTS devices (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id),
            subscription_id INTEGER NOT NULL REFERENCES subscriptions(id),
            name TEXT NOT NULL,
            public_key TEXT NOT NULL,
            assigned_ip TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            revoked_at INTEGER
        );",
    ),
    (
        "create_indexes",
        "CREATE INDEX IF NOT EXISTS idx_subscriptions_user_id ON subscriptions(user_id);
         CREATE INDEX IF NOT EXISTS idx_subscriptions_status ON subscriptions(status);
         CREATE INDEX IF NOT EXISTS idx_devices_user_id ON devices(user_id);
         CREATE INDEX IF NOT EXISTS idx_devices_subscription_id ON devices(subscription_id);",
    ),
    (
        "create_live_uniqueness",
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_subscriptions_live_user
            ON subscriptions(user_id) WHERE status IN ('active', 'expiring', 'paused');
         CREATE UNIQUE INDEX IF NOT EXISTS uq_devices_active_key
            ON devices(public_key) WHERE revoked_at IS NULL;
         CREATE UNIQUE INDEX IF NOT EXISTS uq_devices_active_ip
            ON devices(assigned_ip) WHERE revoked_at IS NULL;",
    ),
];

pub(crate) fn migrate(conn: &Connection) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|e| DbError::sqlite("failed to enable foreign keys", e))?;
    for (name, sql) in MIGRATIONS {
        conn.execute_batch(sql)
            .map_err(|e| DbError::Storage(format!("migration {name} failed: {e}")))?;
    }
    Ok(())
}
