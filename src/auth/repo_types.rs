use serde::Serialize;
use sqlx::FromRow;

/// User record in the database.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 PHC string, never leaves the auth module
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: i64, // unix millis
}
