//! Database row types. These map directly to SQLite rows and stay
//! string-typed; conversion to domain types happens in the gateway.

pub struct UserRow {
    pub id: String,
    pub display_name: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub content: String,
    pub sender_id: String,
    pub sender_name: String,
    pub event_id: Option<String>,
    pub receiver_id: Option<String>,
    /// RFC 3339, UTC, fixed precision so lexical order is time order.
    pub created_at: String,
    pub is_read: bool,
}
