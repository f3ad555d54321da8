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
        info!("Running migration v1 (users, friendships, messages)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL UNIQUE,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE friendships (
                id              TEXT PRIMARY KEY,
                requester_id    TEXT NOT NULL REFERENCES users(id),
                addressee_id    TEXT NOT NULL REFERENCES users(id),
                status          TEXT NOT NULL DEFAULT 'pending',
                created_at      TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(requester_id, addressee_id)
            );

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                sender_id       TEXT NOT NULL REFERENCES users(id),
                recipient_id    TEXT NOT NULL REFERENCES users(id),
                friendship_id   TEXT NOT NULL REFERENCES friendships(id),
                content         TEXT NOT NULL,
                images          TEXT NOT NULL DEFAULT '[]',
                files           TEXT NOT NULL DEFAULT '[]',
                status          TEXT NOT NULL DEFAULT 'sent',
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE INDEX idx_messages_friendship
                ON messages(friendship_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (notifications, aggregate entities)");
        conn.execute_batch(
            "
            CREATE TABLE publications (
                id              TEXT PRIMARY KEY,
                owner_id        TEXT NOT NULL REFERENCES users(id),
                like_count      INTEGER NOT NULL DEFAULT 0,
                comment_count   INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE comments (
                id              TEXT PRIMARY KEY,
                publication_id  TEXT NOT NULL REFERENCES publications(id),
                owner_id        TEXT NOT NULL REFERENCES users(id),
                like_count      INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE shorts (
                id              TEXT PRIMARY KEY,
                owner_id        TEXT NOT NULL REFERENCES users(id),
                like_count      INTEGER NOT NULL DEFAULT 0,
                comment_count   INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE short_comments (
                id              TEXT PRIMARY KEY,
                short_id        TEXT NOT NULL REFERENCES shorts(id),
                owner_id        TEXT NOT NULL REFERENCES users(id),
                like_count      INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE stories (
                id              TEXT PRIMARY KEY,
                owner_id        TEXT NOT NULL REFERENCES users(id),
                like_count      INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE notifications (
                id              TEXT PRIMARY KEY,
                kind            TEXT NOT NULL,
                sender_id       TEXT NOT NULL REFERENCES users(id),
                recipient_id    TEXT NOT NULL REFERENCES users(id),
                reference_id    TEXT,
                content         TEXT NOT NULL,
                seen            INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL
            );

            -- One row per notification key. The reconciler reads before it
            -- writes, so these indexes are what keeps two concurrent writers
            -- from producing duplicates.
            CREATE UNIQUE INDEX idx_notifications_reference
                ON notifications(kind, reference_id)
                WHERE reference_id IS NOT NULL;

            CREATE UNIQUE INDEX idx_notifications_conversation
                ON notifications(kind, sender_id, recipient_id)
                WHERE reference_id IS NULL;

            CREATE INDEX idx_notifications_recipient
                ON notifications(recipient_id, created_at);

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
