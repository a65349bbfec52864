use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    storage::{self, BlobStore, SharedBlobStore},
    web::{token::TokenIssuer, uploads::UploadPolicy},
};

#[derive(Clone)]
pub struct AppState {
    pool: PgPool,
    config: Arc<AppConfig>,
    blobs: SharedBlobStore,
    tokens: TokenIssuer,
    uploads: Arc<UploadPolicy>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("failed to connect to Postgres")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        let blobs = storage::from_settings(&config.storage)
            .await
            .context("failed to initialize blob store")?;

        Ok(Self::from_parts(pool, config, blobs))
    }

    pub fn from_parts(pool: PgPool, config: AppConfig, blobs: SharedBlobStore) -> Self {
        Self {
            tokens: TokenIssuer::new(&config.token),
            uploads: Arc::new(UploadPolicy::from(&config.upload)),
            pool,
            config: Arc::new(config),
            blobs,
        }
    }

    /// Creates the administrative account on first boot.
    pub async fn ensure_seed_admin(&self) -> Result<()> {
        let has_admin: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM admins)")
            .fetch_one(&self.pool)
            .await
            .context("failed to verify admin presence")?;

        if has_admin {
            return Ok(());
        }

        let seed = &self.config.seed_admin;
        let password_hash = crate::web::auth::hash_password(&seed.password)
            .map_err(|err| anyhow!("failed to hash seed admin password: {err}"))?;

        sqlx::query("INSERT INTO admins (id, username, password_hash) VALUES ($1, $2, $3)")
            .bind(Uuid::new_v4())
            .bind(&seed.username)
            .bind(password_hash)
            .execute(&self.pool)
            .await
            .context("failed to insert seed admin")?;

        info!(username = %seed.username, "seeded administrative account");
        if seed.password == "admin123" {
            warn!("seed admin uses the default password, change it promptly");
        }

        Ok(())
    }

    pub fn pool_ref(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn blobs(&self) -> &dyn BlobStore {
        self.blobs.as_ref()
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub fn uploads(&self) -> &UploadPolicy {
        &self.uploads
    }
}
