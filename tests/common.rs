//! Shared test doubles: in-memory stores, file storage and a scripted renderer.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use docgen_server::auth::lockout::LockoutState;
use docgen_server::auth::model::{User, ROLE_USER};
use docgen_server::config::{AppConfig, JwtConfig, LockoutConfig, SweeperConfig};
use docgen_server::db::{
    CommitOutcome, DocumentStore, StoreError, TemplateStore, UserStore,
};
use docgen_server::document::model::{Document, DocumentWithTemplate};
use docgen_server::document::renderer::{RenderError, Renderer};
use docgen_server::pagination::PageRequest;
use docgen_server::storage::{FileStorage, StorageError, StoredFile};
use docgen_server::template::model::Template;
use docgen_server::AppState;

pub const FAKE_PDF: &[u8] = b"%PDF-1.4 fake document";
pub const TEST_PASSWORD: &str = "correct-horse-battery";

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreData {
    templates: HashMap<Uuid, Template>,
    documents: Vec<Document>,
    users: HashMap<Uuid, User>,
}

/// In-memory implementation of every store trait with atomic commits.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<StoreData>,
    fail_commit: AtomicBool,
    vanish_template_on_commit: AtomicBool,
    lockout_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commits fail with a database error.
    pub fn fail_commits(&self) {
        self.fail_commit.store(true, Ordering::SeqCst);
    }

    /// Simulate a concurrent template delete landing just before the commit.
    pub fn vanish_template_on_commit(&self) {
        self.vanish_template_on_commit.store(true, Ordering::SeqCst);
    }

    pub fn seed_template(&self, user_id: Uuid, content: &str) -> Template {
        let template = Template {
            id: Uuid::new_v4(),
            user_id,
            name: "Invoice".to_string(),
            description: "Monthly invoice".to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
            updated_at: None,
        };
        self.data
            .lock()
            .templates
            .insert(template.id, template.clone());
        template
    }

    /// Insert a row directly, bypassing the engine.
    pub fn seed_document(&self, user_id: Uuid, template_id: Uuid, storage_path: &str) -> Document {
        let document = Document {
            id: Uuid::new_v4(),
            user_id,
            template_id,
            storage_path: storage_path.to_string(),
            generated_at: Utc::now(),
            metadata: "{}".to_string(),
        };
        self.data.lock().documents.push(document.clone());
        document
    }

    pub fn seed_user(&self, username: &str, password_hash: &str) -> User {
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: format!("{}@example.com", username),
            password_hash: password_hash.to_string(),
            role: ROLE_USER.to_string(),
            refresh_token: None,
            refresh_token_expires_at: None,
            failed_login_attempts: 0,
            lockout_end: None,
            created_at: Utc::now(),
        };
        self.data.lock().users.insert(user.id, user.clone());
        user
    }

    pub fn user(&self, id: Uuid) -> Option<User> {
        self.data.lock().users.get(&id).cloned()
    }

    /// Overwrite the stored lockout state of a user.
    pub fn set_lockout(&self, id: Uuid, failed_attempts: i32, lockout_end: Option<DateTime<Utc>>) {
        if let Some(user) = self.data.lock().users.get_mut(&id) {
            user.failed_login_attempts = failed_attempts;
            user.lockout_end = lockout_end;
        }
    }

    pub fn lockout_writes(&self) -> usize {
        self.lockout_writes.load(Ordering::SeqCst)
    }

    pub fn document_count(&self) -> usize {
        self.data.lock().documents.len()
    }

    pub fn documents(&self) -> Vec<Document> {
        self.data.lock().documents.clone()
    }

    pub fn has_template(&self, id: Uuid) -> bool {
        self.data.lock().templates.contains_key(&id)
    }
}

fn page_of<T: Clone>(items: &[T], page: PageRequest) -> Vec<T> {
    items
        .iter()
        .skip(page.offset() as usize)
        .take(page.limit() as usize)
        .cloned()
        .collect()
}

#[async_trait]
impl TemplateStore for MemoryStore {
    async fn insert_template(&self, template: &Template) -> Result<(), StoreError> {
        self.data
            .lock()
            .templates
            .insert(template.id, template.clone());
        Ok(())
    }

    async fn get_template(&self, id: Uuid, user_id: Uuid) -> Result<Option<Template>, StoreError> {
        Ok(self
            .data
            .lock()
            .templates
            .get(&id)
            .filter(|t| t.user_id == user_id)
            .cloned())
    }

    async fn list_templates(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> Result<(Vec<Template>, i64), StoreError> {
        let data = self.data.lock();
        let mut owned: Vec<Template> = data
            .templates
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok((page_of(&owned, page), owned.len() as i64))
    }

    async fn update_template(&self, template: &Template) -> Result<bool, StoreError> {
        let mut data = self.data.lock();
        match data.templates.get_mut(&template.id) {
            Some(existing) if existing.user_id == template.user_id => {
                *existing = template.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_template_cascade(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Vec<String>>, StoreError> {
        let mut data = self.data.lock();
        let owned = data
            .templates
            .get(&id)
            .map(|t| t.user_id == user_id)
            .unwrap_or(false);
        if !owned {
            return Ok(None);
        }

        let mut paths = Vec::new();
        data.documents.retain(|d| {
            if d.template_id == id {
                paths.push(d.storage_path.clone());
                false
            } else {
                true
            }
        });
        data.templates.remove(&id);
        Ok(Some(paths))
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn commit_documents(
        &self,
        template_id: Uuid,
        user_id: Uuid,
        documents: &[Document],
    ) -> Result<CommitOutcome, StoreError> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut data = self.data.lock();
        if self.vanish_template_on_commit.load(Ordering::SeqCst) {
            data.templates.remove(&template_id);
        }

        let present = data
            .templates
            .get(&template_id)
            .map(|t| t.user_id == user_id)
            .unwrap_or(false);
        if !present {
            return Ok(CommitOutcome::TemplateMissing);
        }

        data.documents.extend(documents.iter().cloned());
        Ok(CommitOutcome::Committed)
    }

    async fn get_document(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<DocumentWithTemplate>, StoreError> {
        let data = self.data.lock();
        Ok(data
            .documents
            .iter()
            .find(|d| d.id == id && d.user_id == user_id)
            .map(|d| DocumentWithTemplate {
                document: d.clone(),
                template_name: data.templates.get(&d.template_id).map(|t| t.name.clone()),
            }))
    }

    async fn list_documents(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> Result<(Vec<DocumentWithTemplate>, i64), StoreError> {
        let data = self.data.lock();
        let mut owned: Vec<DocumentWithTemplate> = data
            .documents
            .iter()
            .filter(|d| d.user_id == user_id)
            .map(|d| DocumentWithTemplate {
                document: d.clone(),
                template_name: data.templates.get(&d.template_id).map(|t| t.name.clone()),
            })
            .collect();
        owned.sort_by(|a, b| b.document.generated_at.cmp(&a.document.generated_at));
        Ok((page_of(&owned, page), owned.len() as i64))
    }

    async fn delete_document(&self, id: Uuid, user_id: Uuid) -> Result<Option<String>, StoreError> {
        let mut data = self.data.lock();
        let position = data
            .documents
            .iter()
            .position(|d| d.id == id && d.user_id == user_id);
        Ok(position.map(|index| data.documents.remove(index).storage_path))
    }

    async fn all_storage_paths(&self) -> Result<HashSet<String>, StoreError> {
        Ok(self
            .data
            .lock()
            .documents
            .iter()
            .map(|d| d.storage_path.clone())
            .collect())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .data
            .lock()
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn find_user_by_refresh_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .data
            .lock()
            .users
            .values()
            .find(|u| u.refresh_token.as_deref() == Some(token))
            .cloned())
    }

    async fn username_exists(&self, username: &str) -> Result<bool, StoreError> {
        Ok(self.data.lock().users.values().any(|u| u.username == username))
    }

    async fn email_exists(&self, email: &str) -> Result<bool, StoreError> {
        Ok(self.data.lock().users.values().any(|u| u.email == email))
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut data = self.data.lock();
        if data
            .users
            .values()
            .any(|u| u.username == user.username || u.email == user.email)
        {
            return Err(StoreError::Conflict("users_username_key".to_string()));
        }
        data.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn save_lockout(&self, user_id: Uuid, state: &LockoutState) -> Result<(), StoreError> {
        self.lockout_writes.fetch_add(1, Ordering::SeqCst);
        self.set_lockout(user_id, state.failed_attempts, state.lockout_end);
        Ok(())
    }

    async fn record_failed_login(
        &self,
        user_id: Uuid,
        policy: &LockoutConfig,
        now: DateTime<Utc>,
    ) -> Result<LockoutState, StoreError> {
        self.lockout_writes.fetch_add(1, Ordering::SeqCst);
        let mut data = self.data.lock();
        let user = data
            .users
            .get_mut(&user_id)
            .ok_or(StoreError::Database(sqlx::Error::RowNotFound))?;
        let next = user.lockout_state().record_failure(policy, now);
        user.failed_login_attempts = next.failed_attempts;
        user.lockout_end = next.lockout_end;
        Ok(next)
    }

    async fn save_refresh_token(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if let Some(user) = self.data.lock().users.get_mut(&user_id) {
            user.refresh_token = Some(token.to_string());
            user.refresh_token_expires_at = Some(expires_at);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File storage
// ---------------------------------------------------------------------------

/// In-memory file storage with injectable failures and controllable file ages.
#[derive(Default)]
pub struct MemoryStorage {
    files: Mutex<HashMap<String, (Vec<u8>, SystemTime)>>,
    writes: AtomicUsize,
    /// 1-based index of the write call that fails; 0 disables.
    fail_write_at: AtomicUsize,
    fail_deletes: AtomicBool,
    list_delay: Mutex<Option<Duration>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_write_at(&self, call: usize) {
        self.fail_write_at.store(call, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Make every listing take at least `delay`.
    pub fn slow_list(&self, delay: Duration) {
        *self.list_delay.lock() = Some(delay);
    }

    /// Place a file whose modification time lies `age` in the past.
    pub fn insert_aged(&self, path: &str, age: Duration) {
        let modified = SystemTime::now() - age;
        self.files
            .lock()
            .insert(path.to_string(), (FAKE_PDF.to_vec(), modified));
    }

    pub fn remove(&self, path: &str) {
        self.files.lock().remove(path);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.lock().contains_key(path)
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }

    pub fn paths(&self) -> HashSet<String> {
        self.files.lock().keys().cloned().collect()
    }
}

#[async_trait]
impl FileStorage for MemoryStorage {
    async fn write(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        let call = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_write_at.load(Ordering::SeqCst) == call {
            return Err(StorageError::Io {
                path: path.to_string(),
                source: io::Error::new(io::ErrorKind::Other, "disk full"),
            });
        }

        let mut files = self.files.lock();
        if files.contains_key(path) {
            return Err(StorageError::Io {
                path: path.to_string(),
                source: io::Error::new(io::ErrorKind::AlreadyExists, "file exists"),
            });
        }
        files.insert(path.to_string(), (data.to_vec(), SystemTime::now()));
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        if path.contains("..") || path.starts_with('/') {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        self.files
            .lock()
            .get(path)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Io {
                path: path.to_string(),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "read-only"),
            });
        }
        self.files.lock().remove(path);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<StoredFile>, StorageError> {
        let delay = *self.list_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .files
            .lock()
            .iter()
            .filter(|(path, _)| path.ends_with(".pdf"))
            .map(|(path, (_, modified))| StoredFile {
                path: path.clone(),
                modified: *modified,
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub enum RenderStep {
    Succeed,
    Fail,
    Hang,
}

/// Renderer that follows a per-call script and succeeds once the script runs out.
#[derive(Default)]
pub struct ScriptedRenderer {
    script: Mutex<VecDeque<RenderStep>>,
    calls: AtomicUsize,
}

impl ScriptedRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, steps: &[RenderStep]) {
        *self.script.lock() = steps.iter().copied().collect();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn render(&self, _html: &str) -> Result<Vec<u8>, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(RenderStep::Succeed);
        match step {
            RenderStep::Succeed => Ok(FAKE_PDF.to_vec()),
            RenderStep::Fail => Err(RenderError::BrowserExit(1)),
            RenderStep::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub const RENDER_TIMEOUT: Duration = Duration::from_millis(200);

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "postgres://unused".to_string(),
        db_max_connections: 1,
        bind_address: "127.0.0.1:0".to_string(),
        documents_path: PathBuf::from("unused"),
        jwt: JwtConfig {
            secret: "integration-test-secret-0123456789".to_string(),
            issuer: "docgen-server".to_string(),
            audience: "docgen-client".to_string(),
            access_token_ttl: chrono::Duration::minutes(60),
            refresh_token_ttl: chrono::Duration::days(7),
        },
        lockout: LockoutConfig::default(),
        render_timeout: RENDER_TIMEOUT,
        chrome_path: None,
        sweeper: SweeperConfig {
            initial_delay: Duration::from_millis(10),
            interval: Duration::from_secs(3600),
            min_file_age: Duration::ZERO,
        },
        max_batch_size: 100,
        bcrypt_cost: 4,
    }
}

/// Application state backed entirely by in-memory doubles.
pub struct TestEnv {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub storage: Arc<MemoryStorage>,
    pub renderer: Arc<ScriptedRenderer>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let storage = Arc::new(MemoryStorage::new());
        let renderer = Arc::new(ScriptedRenderer::new());

        let state = AppState::from_parts(
            config,
            store.clone(),
            store.clone(),
            store.clone(),
            storage.clone(),
            renderer.clone(),
        );

        Self {
            state,
            store,
            storage,
            renderer,
        }
    }

    /// Seed a user whose password is [`TEST_PASSWORD`].
    pub fn seed_user(&self, username: &str) -> User {
        let hash = bcrypt::hash(TEST_PASSWORD, 4).unwrap();
        self.store.seed_user(username, &hash)
    }
}
