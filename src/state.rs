use crate::config::AppConfig;
use crate::db;
use crate::generation::{GeminiClient, GenerationClient};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<AppConfig>,
    pub generator: Arc<dyn GenerationClient>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = db::connect(&config.database_url).await?;
        db::migrate(&db).await?;

        let generator = Arc::new(GeminiClient::new(&config.generation)?) as Arc<dyn GenerationClient>;

        Ok(Self {
            db,
            config,
            generator,
        })
    }

    pub fn from_parts(
        db: SqlitePool,
        config: Arc<AppConfig>,
        generator: Arc<dyn GenerationClient>,
    ) -> Self {
        Self {
            db,
            config,
            generator,
        }
    }

    /// In-memory database, fixed development config and the given generator.
    #[cfg(test)]
    pub async fn fake(generator: Arc<dyn GenerationClient>) -> Self {
        use crate::config::{Environment, GenerationConfig, JwtConfig};
        use secrecy::SecretString;

        let db = db::test_pool().await;
        let config = Arc::new(AppConfig {
            environment: Environment::Development,
            database_url: "sqlite::memory:".into(),
            jwt: JwtConfig {
                secret: SecretString::from("test-secret-that-is-long-enough-32b".to_string()),
                ttl_minutes: 5,
            },
            generation: GenerationConfig {
                api_key: SecretString::from("fake".to_string()),
                model: "stub".into(),
                base_url: "http://localhost".into(),
                timeout: std::time::Duration::from_secs(5),
                language: "English".into(),
            },
        });

        Self::from_parts(db, config, generator)
    }
}
