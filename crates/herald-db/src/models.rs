/// Database row types. These map directly to SQLite rows and stay independent
/// of the herald-types API models.

pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    /// Argon2id PHC string
    pub password: String,
    pub created_at: String,
}
