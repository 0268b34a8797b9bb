//! Document generation, lookup and deletion.
//!
//! Rows and files live in two systems with no shared transaction. The engine keeps
//! them consistent by writing files first, committing every row of a request in a
//! single database transaction, and deleting the files it wrote when anything
//! before that commit fails. Files left behind by a crash are reclaimed by the
//! sweeper.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use uuid::Uuid;

use super::model::{BatchGenerationResult, Document, DocumentFile, DocumentView};
use super::renderer::Renderer;
use crate::db::{CommitOutcome, DocumentStore, TemplateStore};
use crate::error::AppError;
use crate::metrics;
use crate::pagination::{PageRequest, Paginated};
use crate::storage::{generate_document_path, FileStorage};
use crate::template::compiler::CompiledTemplate;
use crate::template::model::Template;
use crate::template::TemplateCompiler;

pub struct DocumentEngine {
    templates: Arc<dyn TemplateStore>,
    documents: Arc<dyn DocumentStore>,
    storage: Arc<dyn FileStorage>,
    renderer: Arc<dyn Renderer>,
    compiler: TemplateCompiler,
    render_timeout: Duration,
    max_batch_size: usize,
}

impl DocumentEngine {
    pub fn new(
        templates: Arc<dyn TemplateStore>,
        documents: Arc<dyn DocumentStore>,
        storage: Arc<dyn FileStorage>,
        renderer: Arc<dyn Renderer>,
        compiler: TemplateCompiler,
        render_timeout: Duration,
        max_batch_size: usize,
    ) -> Self {
        Self {
            templates,
            documents,
            storage,
            renderer,
            compiler,
            render_timeout,
            max_batch_size,
        }
    }

    pub async fn generate(
        &self,
        template_id: Uuid,
        user_id: Uuid,
        data: Value,
    ) -> Result<DocumentView, AppError> {
        let mut views = self.generate_all(template_id, user_id, vec![data]).await?;
        views
            .pop()
            .ok_or_else(|| AppError::Internal("generation produced no document".to_string()))
    }

    /// Generate one document per item, all or nothing.
    ///
    /// Any failing item aborts the whole batch with that item's error; no row is
    /// committed and every file written for the batch is removed.
    pub async fn generate_batch(
        &self,
        template_id: Uuid,
        user_id: Uuid,
        items: Vec<Value>,
    ) -> Result<BatchGenerationResult, AppError> {
        if items.is_empty() || items.len() > self.max_batch_size {
            return Err(AppError::Validation(format!(
                "Batch must contain between 1 and {} items",
                self.max_batch_size
            )));
        }

        let total_requested = items.len();
        let documents = self.generate_all(template_id, user_id, items).await?;

        Ok(BatchGenerationResult {
            total_requested,
            success_count: documents.len(),
            failure_count: 0,
            documents,
        })
    }

    async fn generate_all(
        &self,
        template_id: Uuid,
        user_id: Uuid,
        items: Vec<Value>,
    ) -> Result<Vec<DocumentView>, AppError> {
        let result = self.try_generate_all(template_id, user_id, items).await;
        if let Err(e) = &result {
            metrics::GENERATIONS_FAILED
                .with_label_values(&[e.error_type()])
                .inc();
        }
        result
    }

    async fn try_generate_all(
        &self,
        template_id: Uuid,
        user_id: Uuid,
        items: Vec<Value>,
    ) -> Result<Vec<DocumentView>, AppError> {
        let template = self
            .templates
            .get_template(template_id, user_id)
            .await?
            .ok_or(AppError::NotFound("Template"))?;
        let compiled = self.compiler.compiled(&template).await?;

        let total = items.len();
        log::debug!(
            "Generating {} document(s) from template {} for user {}",
            total,
            template.id,
            user_id
        );
        let mut written: Vec<String> = Vec::with_capacity(total);
        let mut staged: Vec<Document> = Vec::with_capacity(total);

        for (index, data) in items.into_iter().enumerate() {
            match self
                .produce(&compiled, &template, user_id, data, &mut written)
                .await
            {
                Ok(document) => staged.push(document),
                Err(e) => {
                    log::warn!(
                        "Item {}/{} for template {} failed, discarding {} written file(s): {}",
                        index + 1,
                        total,
                        template.id,
                        written.len(),
                        e
                    );
                    self.discard_files(&written).await;
                    return Err(e);
                }
            }
        }

        match self
            .documents
            .commit_documents(template.id, user_id, &staged)
            .await
        {
            Ok(CommitOutcome::Committed) => {}
            Ok(CommitOutcome::TemplateMissing) => {
                log::warn!(
                    "Template {} was deleted during generation, discarding {} file(s)",
                    template.id,
                    written.len()
                );
                self.discard_files(&written).await;
                return Err(AppError::NotFound("Template"));
            }
            Err(e) => {
                log::error!("Failed to commit documents for template {}: {}", template.id, e);
                self.discard_files(&written).await;
                return Err(e.into());
            }
        }

        metrics::DOCUMENTS_GENERATED.inc_by(staged.len() as u64);
        log::info!(
            "Generated {} document(s) from template {} for user {}",
            staged.len(),
            template.id,
            user_id
        );

        Ok(staged
            .into_iter()
            .map(|document| DocumentView::new(document, Some(template.name.clone())))
            .collect())
    }

    /// Render one item and write its file. The path is recorded in `written` as
    /// soon as the file exists so the caller can remove it later.
    async fn produce(
        &self,
        compiled: &CompiledTemplate,
        template: &Template,
        user_id: Uuid,
        data: Value,
        written: &mut Vec<String>,
    ) -> Result<Document, AppError> {
        let metadata = serde_json::to_string(&data)
            .map_err(|e| AppError::Internal(format!("failed to serialize input data: {}", e)))?;
        let html = compiled.render(&data)?;

        let started = Instant::now();
        let pdf = match tokio::time::timeout(self.render_timeout, self.renderer.render(&html)).await
        {
            Ok(result) => result?,
            Err(_) => return Err(AppError::RenderTimeout(self.render_timeout)),
        };
        metrics::RENDER_SECONDS.observe(started.elapsed().as_secs_f64());

        let storage_path = generate_document_path();
        self.storage
            .write(&storage_path, &pdf)
            .await
            .map_err(|e| AppError::StorageIo(e.to_string()))?;
        written.push(storage_path.clone());

        Ok(Document {
            id: Uuid::new_v4(),
            user_id,
            template_id: template.id,
            storage_path,
            generated_at: Utc::now(),
            metadata,
        })
    }

    pub async fn get_document(&self, id: Uuid, user_id: Uuid) -> Result<DocumentView, AppError> {
        self.documents
            .get_document(id, user_id)
            .await?
            .map(DocumentView::from)
            .ok_or(AppError::NotFound("Document"))
    }

    pub async fn list_documents(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> Result<Paginated<DocumentView>, AppError> {
        let page = page.normalized();
        let (rows, total) = self.documents.list_documents(user_id, page).await?;
        Ok(Paginated::new(
            rows.into_iter().map(DocumentView::from).collect(),
            total,
            page,
        ))
    }

    pub async fn read_file(&self, id: Uuid, user_id: Uuid) -> Result<DocumentFile, AppError> {
        let row = self
            .documents
            .get_document(id, user_id)
            .await?
            .ok_or(AppError::NotFound("Document"))?;
        let path = row.document.storage_path;

        let bytes = self.storage.read(&path).await.map_err(|e| {
            log::warn!("Cannot read file for document {}: {}", id, e);
            AppError::from(e)
        })?;

        Ok(DocumentFile {
            file_name: path,
            bytes,
        })
    }

    /// Delete the row, then its file. A file that cannot be removed is left for the sweeper.
    pub async fn delete_document(&self, id: Uuid, user_id: Uuid) -> Result<(), AppError> {
        let path = self
            .documents
            .delete_document(id, user_id)
            .await?
            .ok_or(AppError::NotFound("Document"))?;

        self.discard_files(std::slice::from_ref(&path)).await;
        log::info!("Document {} deleted by user {}", id, user_id);
        Ok(())
    }

    /// Delete a template and all of its documents. Returns how many documents went with it.
    pub async fn delete_by_template(&self, template_id: Uuid, user_id: Uuid) -> Result<usize, AppError> {
        let paths = self
            .templates
            .delete_template_cascade(template_id, user_id)
            .await?
            .ok_or(AppError::NotFound("Template"))?;

        self.discard_files(&paths).await;
        log::info!(
            "Template {} deleted by user {} along with {} document(s)",
            template_id,
            user_id,
            paths.len()
        );
        Ok(paths.len())
    }

    /// Best-effort removal; failures are logged and counted, never returned.
    async fn discard_files(&self, paths: &[String]) {
        let results = join_all(paths.iter().map(|path| self.storage.delete(path))).await;
        for (path, result) in paths.iter().zip(results) {
            if let Err(e) = result {
                metrics::CLEANUP_FAILURES.inc();
                log::warn!("Failed to remove file {}, leaving it for the sweeper: {}", path, e);
            }
        }
    }
}
