//! Rows as stored in SQLite, before conversion to domain types.

pub struct UserRow {
    pub id: i64,
    pub name: Option<String>,
    pub nickname: Option<String>,
    pub reputation: Option<i64>,
}

pub struct MessageRow {
    pub id: i64,
    pub room_type: String,
    pub author_id: i64,
    pub author_name: String,
    pub text: String,
    pub looking_for_companion: bool,
    pub created_at: String,
}
