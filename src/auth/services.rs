use lazy_static::lazy_static;
use regex::Regex;
use sqlx::SqlitePool;
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{ProfileUpdate, RegisterRequest},
        jwt::JwtKeys,
        password::{hash_password, verify_password},
        repo_types::User,
    },
    error::AppError,
};

const BAD_CREDENTIALS: &str = "Incorrect email or password";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[instrument(skip_all)]
pub async fn register(db: &SqlitePool, req: RegisterRequest) -> Result<User, AppError> {
    let email = normalize_email(&req.email);
    if !is_valid_email(&email) {
        return Err(AppError::Validation("Invalid email".into()));
    }
    if req.password.is_empty() {
        return Err(AppError::Validation("Password must not be empty".into()));
    }
    let name = req
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());

    if User::find_by_email(db, &email).await?.is_some() {
        warn!("email already registered");
        return Err(AppError::Conflict("Email already registered".into()));
    }

    let hash = hash_password(&req.password).map_err(|e| AppError::Internal(e.to_string()))?;

    // a concurrent registration can still win the race; the unique index decides
    let user = User::create(db, &email, &hash, name).await.map_err(|e| {
        let duplicate = e
            .as_database_error()
            .map(|db_err| db_err.is_unique_violation())
            .unwrap_or(false);
        if duplicate {
            AppError::Conflict("Email already registered".into())
        } else {
            AppError::Storage(e)
        }
    })?;

    info!(user_id = user.id, "user registered");
    Ok(user)
}

/// `None` for an unknown email and for a wrong password alike.
#[instrument(skip_all)]
pub async fn authenticate(
    db: &SqlitePool,
    email: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    let email = normalize_email(email);
    let Some(user) = User::find_by_email(db, &email).await? else {
        return Ok(None);
    };
    match verify_password(password, &user.password_hash) {
        Ok(true) => Ok(Some(user)),
        Ok(false) => Ok(None),
        Err(e) => {
            error!(error = %e, user_id = user.id, "stored hash unreadable");
            Err(AppError::Internal("password verification failed".into()))
        }
    }
}

/// Login: the same error for every credential mismatch.
pub async fn login(
    db: &SqlitePool,
    keys: &JwtKeys,
    email: &str,
    password: &str,
) -> Result<String, AppError> {
    let user = authenticate(db, email, password)
        .await?
        .ok_or_else(|| AppError::Unauthenticated(BAD_CREDENTIALS.into()))?;
    info!(user_id = user.id, "user logged in");
    issue_token(keys, &user)
}

pub fn issue_token(keys: &JwtKeys, user: &User) -> Result<String, AppError> {
    keys.issue(user.id, &user.email)
        .map_err(|e| AppError::Internal(format!("jwt sign failed: {e}")))
}

/// Bearer token to a live user. Bad signature, expiry, a missing `user_id`
/// claim and a deleted user all read as unauthenticated.
pub async fn resolve_token(
    db: &SqlitePool,
    keys: &JwtKeys,
    token: &str,
) -> Result<User, AppError> {
    let claims = keys.verify(token).map_err(|e| {
        warn!(error = %e, "invalid or expired token");
        AppError::unauthenticated()
    })?;
    let user_id = claims.user_id.ok_or_else(|| {
        warn!("token without user_id");
        AppError::unauthenticated()
    })?;
    User::find_by_id(db, user_id).await?.ok_or_else(|| {
        warn!(user_id, "token for unknown user");
        AppError::unauthenticated()
    })
}

/// Absent fields stay as they are; blank fields clear the value.
#[instrument(skip(db, current, update), fields(user_id = current.id))]
pub async fn update_profile(
    db: &SqlitePool,
    current: &User,
    update: ProfileUpdate,
) -> Result<User, AppError> {
    let name = match update.name.as_deref().map(str::trim) {
        None => current.name.clone(),
        Some("") => None,
        Some(n) => Some(n.to_string()),
    };
    let avatar_url = match update.avatar_url.as_deref().map(str::trim) {
        None => current.avatar_url.clone(),
        Some("") => None,
        Some(raw) => {
            url::Url::parse(raw)
                .map_err(|e| AppError::Validation(format!("Invalid avatar_url: {e}")))?;
            Some(raw.to_string())
        }
    };

    User::update_profile(db, current.id, name.as_deref(), avatar_url.as_deref())
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use time::Duration;

    fn keys() -> JwtKeys {
        JwtKeys::new(b"service-test-secret-service-test-secret", Duration::days(7))
    }

    fn req(email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            password: password.into(),
            name: None,
        }
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("a@x.com"));
        assert!(!is_valid_email("a@x"));
        assert!(!is_valid_email("a x@y.com"));
        assert_eq!(normalize_email("  A@X.Com "), "a@x.com");
    }

    #[tokio::test]
    async fn register_login_resolve_round_trip() {
        let db = test_pool().await;
        let user = register(&db, req("a@x.com", "pw123")).await.unwrap();
        let token = login(&db, &keys(), "a@x.com", "pw123").await.unwrap();
        let resolved = resolve_token(&db, &keys(), &token).await.unwrap();
        assert_eq!(resolved.id, user.id);
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn logs_never_carry_the_email() {
        let db = test_pool().await;
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        register(&db, req("hidden@x.com", "pw123")).await.unwrap();
        login(&db, &keys(), "hidden@x.com", "pw123").await.unwrap();

        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("user registered"));
        assert!(logs.contains("user logged in"));
        assert!(!logs.contains("hidden@x.com"));
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let db = test_pool().await;
        register(&db, req("a@x.com", "pw123")).await.unwrap();
        let err = register(&db, req("A@x.com", "other")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn register_rejects_bad_input() {
        let db = test_pool().await;
        assert!(matches!(
            register(&db, req("nope", "pw")).await.unwrap_err(),
            AppError::Validation(_)
        ));
        assert!(matches!(
            register(&db, req("a@x.com", "")).await.unwrap_err(),
            AppError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_look_the_same() {
        let db = test_pool().await;
        register(&db, req("a@x.com", "pw123")).await.unwrap();

        let unknown = login(&db, &keys(), "b@x.com", "pw123").await.unwrap_err();
        let wrong = login(&db, &keys(), "a@x.com", "nope").await.unwrap_err();
        assert!(matches!(unknown, AppError::Unauthenticated(_)));
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[tokio::test]
    async fn resolve_rejects_expired_and_foreign_tokens() {
        let db = test_pool().await;
        let user = register(&db, req("a@x.com", "pw123")).await.unwrap();

        let expired = keys()
            .issue_with_ttl(user.id, &user.email, Duration::seconds(-5))
            .unwrap();
        assert!(matches!(
            resolve_token(&db, &keys(), &expired).await.unwrap_err(),
            AppError::Unauthenticated(_)
        ));

        let ghost = keys().issue(user.id + 100, "ghost@x.com").unwrap();
        assert!(matches!(
            resolve_token(&db, &keys(), &ghost).await.unwrap_err(),
            AppError::Unauthenticated(_)
        ));
    }

    #[tokio::test]
    async fn resolve_rejects_token_without_user_id() {
        let db = test_pool().await;
        let claims = serde_json::json!({
            "sub": "a@x.com",
            "iat": time::OffsetDateTime::now_utc().unix_timestamp(),
            "exp": time::OffsetDateTime::now_utc().unix_timestamp() + 3600,
        });
        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(b"service-test-secret-service-test-secret"),
        )
        .unwrap();
        assert!(matches!(
            resolve_token(&db, &keys(), &token).await.unwrap_err(),
            AppError::Unauthenticated(_)
        ));
    }

    #[tokio::test]
    async fn profile_update_keeps_absent_and_clears_blank() {
        let db = test_pool().await;
        let mut r = req("a@x.com", "pw123");
        r.name = Some("Ana".into());
        let user = register(&db, r).await.unwrap();

        let updated = update_profile(
            &db,
            &user,
            ProfileUpdate {
                name: None,
                avatar_url: Some("https://cdn.example.com/a.png".into()),
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.name.as_deref(), Some("Ana"));
        assert_eq!(updated.avatar_url.as_deref(), Some("https://cdn.example.com/a.png"));

        let cleared = update_profile(
            &db,
            &updated,
            ProfileUpdate {
                name: Some("  ".into()),
                avatar_url: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(cleared.name, None);
        assert!(cleared.avatar_url.is_some());

        let err = update_profile(
            &db,
            &cleared,
            ProfileUpdate {
                name: None,
                avatar_url: Some("not a url".into()),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
