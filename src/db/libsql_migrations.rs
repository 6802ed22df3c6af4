//! Schema for the libSQL backend. Every statement is idempotent.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS orders (
    reference TEXT PRIMARY KEY,
    merchant_ref TEXT NOT NULL UNIQUE,
    amount INTEGER NOT NULL,
    service_kind TEXT NOT NULL,
    duration_days INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    payment_method TEXT NOT NULL,
    payment_name TEXT,
    pay_url TEXT,
    checkout_url TEXT,
    expires_at TEXT,
    origin_channel TEXT,
    customer_name TEXT NOT NULL,
    customer_phone TEXT,
    provisioning_payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    paid_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_orders_channel ON orders(origin_channel, created_at);
CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);

CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL,
    kind TEXT NOT NULL,
    secret TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    order_reference TEXT,
    origin_channel TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_accounts_active_username
    ON accounts(username, kind) WHERE status = 'active';
CREATE UNIQUE INDEX IF NOT EXISTS idx_accounts_order_reference
    ON accounts(order_reference) WHERE order_reference IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_accounts_expiry ON accounts(status, expires_at);

CREATE TABLE IF NOT EXISTS telegram_users (
    chat_id INTEGER PRIMARY KEY,
    username TEXT,
    first_name TEXT,
    last_name TEXT,
    first_seen TEXT NOT NULL,
    last_activity TEXT NOT NULL
);
"#;
