use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::auth::repo_types::User;

const USER_COLUMNS: &str = "id, email, password_hash, name, avatar_url, created_at";

impl User {
    pub async fn find_by_email(db: &SqlitePool, email: &str) -> sqlx::Result<Option<User>> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
            .bind(email)
            .fetch_optional(db)
            .await
    }

    pub async fn find_by_id(db: &SqlitePool, id: i64) -> sqlx::Result<Option<User>> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id)
            .fetch_optional(db)
            .await
    }

    /// Insert a new user. A duplicate email surfaces as a unique violation.
    pub async fn create(
        db: &SqlitePool,
        email: &str,
        password_hash: &str,
        name: Option<&str>,
    ) -> sqlx::Result<User> {
        let created_at = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (email, password_hash, name, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(email)
        .bind(password_hash)
        .bind(name)
        .bind(created_at)
        .fetch_one(db)
        .await
    }

    /// Overwrite the mutable profile fields.
    pub async fn update_profile(
        db: &SqlitePool,
        id: i64,
        name: Option<&str>,
        avatar_url: Option<&str>,
    ) -> sqlx::Result<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET name = ?, avatar_url = ?
             WHERE id = ?
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(name)
        .bind(avatar_url)
        .bind(id)
        .fetch_optional(db)
        .await
    }
}
