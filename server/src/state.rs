use std::sync::Arc;

use anyhow::Context;
use reqwest::Client;

use crate::config::Config;
use crate::providers::{
    AccessTokenSource, FirebaseIdentity, GcsStorage, IdentityProvider, ObjectStorage,
};
use crate::store::{PgStore, Store};

/// Shared dependencies handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub identity: Arc<dyn IdentityProvider>,
    pub storage: Arc<dyn ObjectStorage>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        identity: Arc<dyn IdentityProvider>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Self {
        Self {
            store,
            identity,
            storage,
        }
    }

    /// Connects the production store and provider clients.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store = connect_store(config).await?;
        let http = Client::new();
        let storage = GcsStorage::new(
            http.clone(),
            &config.storage_url,
            &config.media_bucket,
            AccessTokenSource::from_env_token(config.google_access_token.clone(), http.clone()),
        );

        Ok(Self::new(
            Arc::new(store),
            Arc::new(identity_client(config, http)),
            Arc::new(storage),
        ))
    }
}

/// Opens the database pool and applies pending migrations.
pub async fn connect_store(config: &Config) -> anyhow::Result<PgStore> {
    let store = PgStore::connect(&config.database_url, config.database_max_connections)
        .await
        .context("failed to connect to database")?;
    tracing::info!("Successfully connected to database");

    store.migrate().await.context("failed to run migrations")?;
    tracing::info!("Migrations run successfully");
    Ok(store)
}

pub fn identity_client(config: &Config, http: Client) -> FirebaseIdentity {
    FirebaseIdentity::new(
        http.clone(),
        &config.identity_toolkit_url,
        &config.firebase_project_id,
        &config.firebase_api_key,
        AccessTokenSource::from_env_token(config.google_access_token.clone(), http),
    )
}
