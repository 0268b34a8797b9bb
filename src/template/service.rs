//! Owner-scoped template management.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::compiler::TemplateCompiler;
use super::model::{CreateTemplateRequest, Template, TemplateView, UpdateTemplateRequest};
use crate::db::TemplateStore;
use crate::document::DocumentEngine;
use crate::error::AppError;
use crate::pagination::{PageRequest, Paginated};

pub const MAX_TEMPLATE_BYTES: usize = 1_000_000;
const MAX_NAME_LENGTH: usize = 200;

#[derive(Clone)]
pub struct TemplateService {
    store: Arc<dyn TemplateStore>,
    compiler: TemplateCompiler,
    engine: Arc<DocumentEngine>,
}

impl TemplateService {
    pub fn new(
        store: Arc<dyn TemplateStore>,
        compiler: TemplateCompiler,
        engine: Arc<DocumentEngine>,
    ) -> Self {
        Self {
            store,
            compiler,
            engine,
        }
    }

    pub async fn create(
        &self,
        user_id: Uuid,
        request: CreateTemplateRequest,
    ) -> Result<TemplateView, AppError> {
        let name = validate_name(&request.name)?;
        self.validate_content(&request.content)?;

        let template = Template {
            id: Uuid::new_v4(),
            user_id,
            name,
            description: request.description.trim().to_string(),
            content: request.content,
            created_at: Utc::now(),
            updated_at: None,
        };
        self.store.insert_template(&template).await?;

        log::info!("Template {} created by user {}", template.id, user_id);
        Ok(template.into())
    }

    pub async fn get(&self, id: Uuid, user_id: Uuid) -> Result<TemplateView, AppError> {
        self.store
            .get_template(id, user_id)
            .await?
            .map(TemplateView::from)
            .ok_or(AppError::NotFound("Template"))
    }

    pub async fn list(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> Result<Paginated<TemplateView>, AppError> {
        let page = page.normalized();
        let (items, total) = self.store.list_templates(user_id, page).await?;
        Ok(Paginated::new(
            items.into_iter().map(TemplateView::from).collect(),
            total,
            page,
        ))
    }

    pub async fn update(
        &self,
        id: Uuid,
        user_id: Uuid,
        request: UpdateTemplateRequest,
    ) -> Result<TemplateView, AppError> {
        let mut template = self
            .store
            .get_template(id, user_id)
            .await?
            .ok_or(AppError::NotFound("Template"))?;

        if let Some(name) = request.name.as_deref().filter(|n| !n.trim().is_empty()) {
            template.name = validate_name(name)?;
        }
        if let Some(description) = request.description {
            template.description = description.trim().to_string();
        }
        if let Some(content) = request.content.filter(|c| !c.trim().is_empty()) {
            self.validate_content(&content)?;
            template.content = content;
        }
        template.updated_at = Some(Utc::now());

        if !self.store.update_template(&template).await? {
            return Err(AppError::NotFound("Template"));
        }
        self.compiler.invalidate(&template.id).await;

        log::info!("Template {} updated by user {}", template.id, user_id);
        Ok(template.into())
    }

    /// Delete the template together with every document generated from it.
    pub async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<(), AppError> {
        self.engine.delete_by_template(id, user_id).await?;
        self.compiler.invalidate(&id).await;
        Ok(())
    }

    fn validate_content(&self, content: &str) -> Result<(), AppError> {
        if content.trim().is_empty() {
            return Err(AppError::Validation("Template content is required".to_string()));
        }
        if content.len() > MAX_TEMPLATE_BYTES {
            return Err(AppError::Validation(format!(
                "Template content must not exceed {} bytes",
                MAX_TEMPLATE_BYTES
            )));
        }
        self.compiler.validate(content)?;
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Template name is required".to_string()));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(AppError::Validation(format!(
            "Template name must not exceed {} characters",
            MAX_NAME_LENGTH
        )));
    }
    Ok(name.to_string())
}
