use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use diesel_async::AsyncPgConnection;
use diesel_async::async_connection_wrapper::AsyncConnectionWrapper;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::pooled_connection::deadpool::Object;
use diesel_async::pooled_connection::deadpool::Pool;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use eyre::Result;
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::job::dispatch::{ActionsDispatcher, WorkflowDispatcher};
use crate::job::events::JobEvents;

secretspec_derive::declare_secrets!("../secretspec.toml");

/// Database connection pool type alias.
pub type DbPool = Pool<AsyncPgConnection>;

fn default_port() -> u16 {
    8080
}

#[derive(Deserialize)]
pub struct Config {
    pub base_url: Url,
    #[serde(default = "default_port")]
    pub port: u16,
    pub github: GitHub,
    pub worker: Worker,
    #[serde(default)]
    pub job: Job,
}

impl Config {
    pub fn new(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Err(eyre::eyre!(
                "Config file not found: {}",
                config_path.display()
            ));
        }
        let config_str = std::fs::read_to_string(config_path)?;
        let config: Config = toml::from_str(&config_str)?;
        Ok(config)
    }
}

#[derive(Deserialize)]
pub struct GitHub {
    pub app_id: u64,
    pub app_name: String,
    #[serde(default = "default_trigger_phrase")]
    pub trigger_phrase: String,
    #[serde(default = "default_trigger_label")]
    pub trigger_label: String,
}

fn default_trigger_phrase() -> String {
    "@patchpilot".to_string()
}

fn default_trigger_label() -> String {
    "patchpilot".to_string()
}

/// Coordinates of the worker repository whose workflow performs the actual
/// fix-and-PR work.
#[derive(Deserialize)]
pub struct Worker {
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_workflow_file")]
    pub workflow_file: String,
    #[serde(default = "default_workflow_ref")]
    pub git_ref: String,
}

fn default_workflow_file() -> String {
    "fix.yml".to_string()
}

fn default_workflow_ref() -> String {
    "main".to_string()
}

fn default_job_timeout_seconds() -> u64 {
    3600 // Default to 1 hour (3600 seconds)
}

#[derive(Deserialize)]
pub struct Job {
    #[serde(default = "default_job_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for Job {
    fn default() -> Self {
        Self {
            timeout_seconds: default_job_timeout_seconds(),
        }
    }
}

#[derive(Serialize, Deserialize, utoipa::ToSchema)]
pub struct FrontendConfig {
    pub github_app_name: String,
    pub trigger_phrase: String,
}

#[derive(Clone)]
pub struct AppState(Arc<InnerState>);

impl Deref for AppState {
    type Target = InnerState;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

pub struct InnerState {
    pub config: Config,
    pub secrets: SecretSpec,
    pub pool: Pool<AsyncPgConnection>,
    pub github: Octocrab,
    pub dispatcher: Arc<dyn WorkflowDispatcher>,
    pub job_events: JobEvents,
}

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

impl AppState {
    pub async fn new(config: Config, secrets: SecretSpec) -> Result<Self, eyre::Error> {
        let database_url = match &secrets.database_url {
            Some(secret) => secret.clone(),
            None => {
                // Fallback to PGHOST for Unix socket connection
                match std::env::var("PGHOST") {
                    Ok(host) => format!("postgres:///patchpilot?host={}", host),
                    Err(_) => return Err(eyre::eyre!("Neither DATABASE_URL nor PGHOST is set")),
                }
            }
        };

        let manager =
            AsyncDieselConnectionManager::<diesel_async::AsyncPgConnection>::new(&database_url);
        let pool = Pool::builder(manager)
            .build()
            .map_err(|e| eyre::eyre!("Failed to create database pool: {}", e))?;

        let app_private_key = jsonwebtoken::EncodingKey::from_rsa_pem(
            secrets
                .github_app_private_key
                .as_ref()
                .ok_or_else(|| eyre::eyre!("GitHub App private key not configured"))?
                .as_bytes(),
        )
        .map_err(|e| eyre::eyre!("Failed to parse Github private key: {}", e))?;

        let github = Octocrab::builder()
            .app(
                octocrab::models::AppId(config.github.app_id),
                app_private_key,
            )
            .build()?;

        // The worker workflow is dispatched with a dedicated token rather than
        // the app credentials; the worker repository is not an installation.
        let dispatch_token = secrets
            .worker_dispatch_token
            .as_ref()
            .ok_or_else(|| eyre::eyre!("Worker dispatch token not configured"))?
            .clone();
        let worker_client = Octocrab::builder().personal_token(dispatch_token).build()?;
        let dispatcher: Arc<dyn WorkflowDispatcher> =
            Arc::new(ActionsDispatcher::new(worker_client, &config.worker));

        let job_events = JobEvents::new();

        let state = InnerState {
            config,
            secrets,
            pool,
            github,
            dispatcher,
            job_events,
        };

        Ok(Self(Arc::new(state)))
    }

    /// Master key for credential encryption at rest. Absence is a hard error
    /// that aborts the calling request path.
    pub fn master_key(&self) -> Result<&str> {
        self.secrets
            .master_encryption_key
            .as_deref()
            .ok_or_else(|| eyre::eyre!("Master encryption key not configured"))
    }

    pub async fn run_migrations(self: &AppState) -> Result<()> {
        tracing::info!("Running database migrations");
        let conn = self.pool.get().await?;
        let mut async_wrapper: AsyncConnectionWrapper<Object<AsyncPgConnection>> =
            AsyncConnectionWrapper::from(conn);
        tokio::task::spawn_blocking(move || {
            async_wrapper.run_pending_migrations(MIGRATIONS).unwrap();
        })
        .await?;
        Ok(())
    }
}
