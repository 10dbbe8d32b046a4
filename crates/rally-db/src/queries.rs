use crate::models::{MessageRow, UserRow};
use crate::Database;
use anyhow::Result;
use rally_types::models::EventRole;
use rusqlite::{Connection, Row};

const MESSAGE_COLUMNS: &str =
    "id, content, sender_id, sender_name, event_id, receiver_id, created_at, is_read";

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, display_name: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, display_name) VALUES (?1, ?2)",
                (id, display_name),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, display_name, created_at FROM users WHERE id = ?1",
                [id],
                |row| {
                    Ok(UserRow {
                        id: row.get(0)?,
                        display_name: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }

    pub fn get_display_name(&self, id: &str) -> Result<Option<String>> {
        Ok(self.get_user_by_id(id)?.map(|u| u.display_name))
    }

    // -- Events, roles, tickets (written by the REST layer, seeded in tests) --

    pub fn create_event(&self, id: &str, organizer_id: &str, title: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO events (id, organizer_id, title) VALUES (?1, ?2, ?3)",
                (id, organizer_id, title),
            )?;
            Ok(())
        })
    }

    /// Only `CoOrganizer` and `Sponsor` are stored as rows; organizer comes
    /// from `events.organizer_id` and attendee from a confirmed ticket.
    pub fn grant_event_role(&self, event_id: &str, user_id: &str, role: EventRole) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO event_roles (event_id, user_id, role) VALUES (?1, ?2, ?3)",
                (event_id, user_id, role.as_str()),
            )?;
            Ok(())
        })
    }

    pub fn create_ticket(&self, id: &str, event_id: &str, user_id: &str, status: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tickets (id, event_id, user_id, status) VALUES (?1, ?2, ?3, ?4)",
                (id, event_id, user_id, status),
            )?;
            Ok(())
        })
    }

    pub fn set_ticket_status(&self, id: &str, status: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE tickets SET status = ?2 WHERE id = ?1", (id, status))?;
            Ok(())
        })
    }

    /// Every role `user_id` currently holds for `event_id`.
    pub fn event_roles(&self, user_id: &str, event_id: &str) -> Result<Vec<EventRole>> {
        self.with_conn(|conn| query_event_roles(conn, user_id, event_id))
    }

    // -- Messages --

    pub fn insert_message(&self, row: &MessageRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, content, sender_id, sender_name, event_id, receiver_id, created_at, is_read)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    row.id,
                    row.content,
                    row.sender_id,
                    row.sender_name,
                    row.event_id,
                    row.receiver_id,
                    row.created_at,
                    row.is_read,
                ],
            )?;
            Ok(())
        })
    }

    /// Newest first.
    pub fn recent_event_messages(&self, event_id: &str, limit: u32, offset: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE event_id = ?1
                 ORDER BY created_at DESC, seq DESC
                 LIMIT ?2 OFFSET ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![event_id, limit, offset], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Newest first, both directions of the `a` <-> `b` conversation.
    pub fn recent_direct_messages(&self, a: &str, b: &str, limit: u32, offset: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at DESC, seq DESC
                 LIMIT ?3 OFFSET ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![a, b, limit, offset], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Marks unread direct messages from `sender_id` to `reader_id` as read.
    /// Returns the number of rows changed.
    pub fn mark_direct_read(&self, reader_id: &str, sender_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_read = 1
                 WHERE receiver_id = ?1 AND sender_id = ?2 AND is_read = 0",
                (reader_id, sender_id),
            )?;
            Ok(changed)
        })
    }
}

fn query_event_roles(conn: &Connection, user_id: &str, event_id: &str) -> Result<Vec<EventRole>> {
    let mut roles = Vec::new();

    let organizer: Option<String> = conn
        .query_row(
            "SELECT organizer_id FROM events WHERE id = ?1",
            [event_id],
            |row| row.get(0),
        )
        .optional()?;
    if organizer.as_deref() == Some(user_id) {
        roles.push(EventRole::Organizer);
    }

    let mut stmt = conn.prepare("SELECT role FROM event_roles WHERE event_id = ?1 AND user_id = ?2")?;
    let stored = stmt
        .query_map([event_id, user_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    roles.extend(stored.iter().filter_map(|r| EventRole::parse(r)));

    let confirmed: i64 = conn.query_row(
        "SELECT COUNT(*) FROM tickets WHERE event_id = ?1 AND user_id = ?2 AND status = 'confirmed'",
        [event_id, user_id],
        |row| row.get(0),
    )?;
    if confirmed > 0 {
        roles.push(EventRole::Attendee);
    }

    Ok(roles)
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        content: row.get(1)?,
        sender_id: row.get(2)?,
        sender_name: row.get(3)?,
        event_id: row.get(4)?,
        receiver_id: row.get(5)?,
        created_at: row.get(6)?,
        is_read: row.get(7)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Database {
        let db = Database::open_in_memory().unwrap();
        for (id, name) in [("org", "Olga"), ("co", "Cory"), ("spon", "Sam"), ("fan", "Fay"), ("nobody", "Ned")] {
            db.create_user(id, name).unwrap();
        }
        db.create_event("e1", "org", "Launch party").unwrap();
        db.grant_event_role("e1", "co", EventRole::CoOrganizer).unwrap();
        db.grant_event_role("e1", "spon", EventRole::Sponsor).unwrap();
        db.create_ticket("t1", "e1", "fan", "confirmed").unwrap();
        db.create_ticket("t2", "e1", "nobody", "pending").unwrap();
        db
    }

    fn message(id: &str, sender: &str, event: Option<&str>, receiver: Option<&str>, at: &str) -> MessageRow {
        MessageRow {
            id: id.to_string(),
            content: format!("body of {id}"),
            sender_id: sender.to_string(),
            sender_name: sender.to_string(),
            event_id: event.map(str::to_string),
            receiver_id: receiver.map(str::to_string),
            created_at: at.to_string(),
            is_read: false,
        }
    }

    #[test]
    fn roles_come_from_events_role_rows_and_tickets() {
        let db = seeded();
        assert_eq!(db.event_roles("org", "e1").unwrap(), vec![EventRole::Organizer]);
        assert_eq!(db.event_roles("co", "e1").unwrap(), vec![EventRole::CoOrganizer]);
        assert_eq!(db.event_roles("spon", "e1").unwrap(), vec![EventRole::Sponsor]);
        assert_eq!(db.event_roles("fan", "e1").unwrap(), vec![EventRole::Attendee]);
        assert!(db.event_roles("nobody", "e1").unwrap().is_empty());
        assert!(db.event_roles("fan", "missing-event").unwrap().is_empty());
    }

    #[test]
    fn ticket_status_changes_are_visible_immediately() {
        let db = seeded();
        db.set_ticket_status("t1", "refunded").unwrap();
        assert!(db.event_roles("fan", "e1").unwrap().is_empty());

        db.set_ticket_status("t2", "confirmed").unwrap();
        assert_eq!(db.event_roles("nobody", "e1").unwrap(), vec![EventRole::Attendee]);
    }

    #[test]
    fn event_history_is_newest_first_with_offset() {
        let db = seeded();
        for i in 1..=5 {
            let at = format!("2026-03-01T10:00:0{i}.000000Z");
            db.insert_message(&message(&format!("m{i}"), "fan", Some("e1"), None, &at)).unwrap();
        }

        let ids = |rows: Vec<MessageRow>| rows.into_iter().map(|r| r.id).collect::<Vec<_>>();
        assert_eq!(ids(db.recent_event_messages("e1", 2, 0).unwrap()), vec!["m5", "m4"]);
        assert_eq!(ids(db.recent_event_messages("e1", 2, 2).unwrap()), vec!["m3", "m2"]);
        assert_eq!(ids(db.recent_event_messages("e1", 10, 4).unwrap()), vec!["m1"]);
    }

    #[test]
    fn identical_timestamps_fall_back_to_insertion_order() {
        let db = seeded();
        let at = "2026-03-01T10:00:00.000000Z";
        db.insert_message(&message("first", "fan", Some("e1"), None, at)).unwrap();
        db.insert_message(&message("second", "fan", Some("e1"), None, at)).unwrap();

        let rows = db.recent_event_messages("e1", 10, 0).unwrap();
        assert_eq!(rows[0].id, "second");
        assert_eq!(rows[1].id, "first");
    }

    #[test]
    fn direct_history_covers_both_directions_only() {
        let db = seeded();
        db.insert_message(&message("a", "fan", None, Some("org"), "2026-03-01T10:00:01.000000Z")).unwrap();
        db.insert_message(&message("b", "org", None, Some("fan"), "2026-03-01T10:00:02.000000Z")).unwrap();
        db.insert_message(&message("c", "co", None, Some("fan"), "2026-03-01T10:00:03.000000Z")).unwrap();

        let rows = db.recent_direct_messages("fan", "org", 10, 0).unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn message_must_have_exactly_one_discriminator() {
        let db = seeded();
        let both = message("x", "fan", Some("e1"), Some("org"), "2026-03-01T10:00:00.000000Z");
        assert!(db.insert_message(&both).is_err());

        let neither = message("y", "fan", None, None, "2026-03-01T10:00:00.000000Z");
        assert!(db.insert_message(&neither).is_err());
    }

    #[test]
    fn mark_read_only_touches_the_named_sender() {
        let db = seeded();
        db.insert_message(&message("a", "org", None, Some("fan"), "2026-03-01T10:00:01.000000Z")).unwrap();
        db.insert_message(&message("b", "org", None, Some("fan"), "2026-03-01T10:00:02.000000Z")).unwrap();
        db.insert_message(&message("c", "co", None, Some("fan"), "2026-03-01T10:00:03.000000Z")).unwrap();

        assert_eq!(db.mark_direct_read("fan", "org").unwrap(), 2);
        assert_eq!(db.mark_direct_read("fan", "org").unwrap(), 0);

        let from_co = db.recent_direct_messages("fan", "co", 10, 0).unwrap();
        assert!(!from_co[0].is_read);
    }
}
