//! Database module - store traits, the PostgreSQL implementation and AppState
//!
//! This module is split into submodules for better separation of concerns:
//! - `template` - Template rows, including the cascading delete
//! - `document` - Document rows and the batch commit
//! - `user` - Accounts, refresh tokens and lockout state

mod document;
mod template;
mod user;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::lockout::LockoutState;
use crate::auth::model::User;
use crate::auth::AuthService;
use crate::config::{AppConfig, LockoutConfig};
use crate::document::model::{Document, DocumentWithTemplate};
use crate::document::renderer::{ChromiumRenderer, Renderer};
use crate::document::sweeper::ReconciliationSweeper;
use crate::document::DocumentEngine;
use crate::pagination::PageRequest;
use crate::storage::{FileStorage, LocalFileStorage};
use crate::template::model::Template;
use crate::template::{TemplateCompiler, TemplateService};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("unique constraint violated: {0}")]
    Conflict(String),
}

/// Result of trying to commit a set of document rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The template was deleted (or changed owner) before the commit; nothing was written.
    TemplateMissing,
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn insert_template(&self, template: &Template) -> Result<(), StoreError>;

    async fn get_template(&self, id: Uuid, user_id: Uuid) -> Result<Option<Template>, StoreError>;

    async fn list_templates(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> Result<(Vec<Template>, i64), StoreError>;

    async fn update_template(&self, template: &Template) -> Result<bool, StoreError>;

    /// Delete a template and every document referencing it in one transaction.
    ///
    /// Returns the storage paths of the removed documents, or `None` when the
    /// template does not exist for this user.
    async fn delete_template_cascade(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Vec<String>>, StoreError>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert all rows atomically, provided the template still exists for `user_id`.
    async fn commit_documents(
        &self,
        template_id: Uuid,
        user_id: Uuid,
        documents: &[Document],
    ) -> Result<CommitOutcome, StoreError>;

    async fn get_document(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<DocumentWithTemplate>, StoreError>;

    async fn list_documents(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> Result<(Vec<DocumentWithTemplate>, i64), StoreError>;

    /// Delete one row and return its storage path.
    async fn delete_document(&self, id: Uuid, user_id: Uuid) -> Result<Option<String>, StoreError>;

    /// Every storage path recorded for any user.
    async fn all_storage_paths(&self) -> Result<HashSet<String>, StoreError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn find_user_by_refresh_token(&self, token: &str) -> Result<Option<User>, StoreError>;

    async fn username_exists(&self, username: &str) -> Result<bool, StoreError>;

    async fn email_exists(&self, email: &str) -> Result<bool, StoreError>;

    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;

    async fn save_lockout(&self, user_id: Uuid, state: &LockoutState) -> Result<(), StoreError>;

    /// Count one failed login against the row as currently stored, in a single
    /// atomic update, and return the resulting state.
    async fn record_failed_login(
        &self,
        user_id: Uuid,
        policy: &LockoutConfig,
        now: DateTime<Utc>,
    ) -> Result<LockoutState, StoreError>;

    async fn save_refresh_token(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// PostgreSQL implementation of every store trait.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(900))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.into()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub templates: TemplateService,
    pub documents: Arc<DocumentEngine>,
    pub auth: AuthService,
    pub sweeper: Arc<ReconciliationSweeper>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let store = Arc::new(PgStore::connect(&config.database_url, config.db_max_connections).await?);
        store.migrate().await?;

        let storage = Arc::new(LocalFileStorage::new(&config.documents_path)?);
        let renderer = Arc::new(ChromiumRenderer::new(config.chrome_path.clone()));

        Ok(Self::from_parts(
            config,
            store.clone(),
            store.clone(),
            store,
            storage,
            renderer,
        ))
    }

    /// Wire the services from explicit collaborators.
    pub fn from_parts(
        config: AppConfig,
        templates: Arc<dyn TemplateStore>,
        documents: Arc<dyn DocumentStore>,
        users: Arc<dyn UserStore>,
        storage: Arc<dyn FileStorage>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        let compiler = TemplateCompiler::new();

        let engine = Arc::new(DocumentEngine::new(
            templates.clone(),
            documents.clone(),
            storage.clone(),
            renderer,
            compiler.clone(),
            config.render_timeout,
            config.max_batch_size,
        ));

        let template_service = TemplateService::new(templates, compiler, engine.clone());
        let auth = AuthService::new(users, config.jwt.clone(), config.lockout, config.bcrypt_cost);
        let sweeper = Arc::new(ReconciliationSweeper::new(
            storage,
            documents,
            config.sweeper.clone(),
        ));

        Self {
            config: Arc::new(config),
            templates: template_service,
            documents: engine,
            auth,
            sweeper,
        }
    }

    /// Start background workers. They stop when `shutdown` is cancelled.
    pub fn spawn_background_tasks(&self, shutdown: CancellationToken) {
        let sweeper = self.sweeper.clone();
        tokio::spawn(async move {
            sweeper.run(shutdown).await;
        });
    }
}
