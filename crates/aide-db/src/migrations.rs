use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                phone_hash  TEXT NOT NULL UNIQUE,
                pin_hash    TEXT,
                name        TEXT,
                email       TEXT,
                persona     TEXT NOT NULL DEFAULT 'friendly',
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE INDEX idx_users_email ON users(email);

            CREATE TABLE sessions (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                expires_at  INTEGER NOT NULL,
                created_at  INTEGER NOT NULL
            );

            CREATE INDEX idx_sessions_user ON sessions(user_id);

            CREATE TABLE subscriptions (
                id                      TEXT PRIMARY KEY,
                user_id                 TEXT NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
                email                   TEXT,
                stripe_customer_id      TEXT,
                stripe_subscription_id  TEXT,
                stripe_price_id         TEXT,
                status                  TEXT NOT NULL,
                current_period_end      INTEGER,
                status_updated_at       INTEGER NOT NULL,
                created_at              TEXT NOT NULL,
                updated_at              TEXT NOT NULL
            );

            CREATE INDEX idx_subscriptions_stripe ON subscriptions(stripe_subscription_id);

            CREATE TABLE reminders (
                id              TEXT PRIMARY KEY,
                user_id         TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                message         TEXT NOT NULL,
                reminder_time   TEXT NOT NULL,
                status          TEXT NOT NULL DEFAULT 'pending',
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_reminders_user ON reminders(user_id, reminder_time);

            CREATE TABLE calendar_events (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title       TEXT NOT NULL,
                description TEXT,
                start_time  TEXT NOT NULL,
                end_time    TEXT,
                timezone    TEXT NOT NULL DEFAULT 'UTC',
                all_day     INTEGER NOT NULL DEFAULT 0,
                reminder_id TEXT REFERENCES reminders(id) ON DELETE SET NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE INDEX idx_events_user ON calendar_events(user_id, start_time);

            CREATE TABLE memories (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title       TEXT NOT NULL,
                content     TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE INDEX idx_memories_user ON memories(user_id, created_at);

            CREATE TABLE feedback (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                category    TEXT NOT NULL,
                message     TEXT NOT NULL,
                rating      INTEGER,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE integration_votes (
                user_id         TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                integration_id  TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                PRIMARY KEY (user_id, integration_id)
            );

            CREATE TABLE integration_vote_counts (
                integration_id  TEXT PRIMARY KEY,
                count           INTEGER NOT NULL DEFAULT 0 CHECK (count >= 0)
            );

            CREATE TABLE rate_limit_hits (
                key         TEXT NOT NULL,
                hit_at_ms   INTEGER NOT NULL
            );

            CREATE INDEX idx_rate_limit_key ON rate_limit_hits(key, hit_at_ms);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
