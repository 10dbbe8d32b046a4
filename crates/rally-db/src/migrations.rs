use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Users, events, roles and tickets are owned by the REST layer; the gateway
/// only reads them. `messages` is the one table the gateway writes.
pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY,
            display_name    TEXT NOT NULL,
            created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS events (
            id              TEXT PRIMARY KEY,
            organizer_id    TEXT NOT NULL REFERENCES users(id),
            title           TEXT NOT NULL,
            created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS event_roles (
            event_id        TEXT NOT NULL REFERENCES events(id),
            user_id         TEXT NOT NULL REFERENCES users(id),
            role            TEXT NOT NULL CHECK (role IN ('co_organizer', 'sponsor')),
            PRIMARY KEY (event_id, user_id, role)
        );

        CREATE TABLE IF NOT EXISTS tickets (
            id              TEXT PRIMARY KEY,
            event_id        TEXT NOT NULL REFERENCES events(id),
            user_id         TEXT NOT NULL REFERENCES users(id),
            status          TEXT NOT NULL
                            CHECK (status IN ('pending', 'confirmed', 'cancelled', 'refunded')),
            created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_tickets_holder
            ON tickets(event_id, user_id);

        CREATE TABLE IF NOT EXISTS messages (
            seq             INTEGER PRIMARY KEY AUTOINCREMENT,
            id              TEXT NOT NULL UNIQUE,
            content         TEXT NOT NULL CHECK (length(content) > 0),
            sender_id       TEXT NOT NULL REFERENCES users(id),
            sender_name     TEXT NOT NULL,
            event_id        TEXT REFERENCES events(id),
            receiver_id     TEXT REFERENCES users(id),
            created_at      TEXT NOT NULL,
            is_read         INTEGER NOT NULL DEFAULT 0,
            CHECK ((event_id IS NULL) <> (receiver_id IS NULL))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_event
            ON messages(event_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_direct
            ON messages(sender_id, receiver_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
