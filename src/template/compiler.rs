//! Handlebars compilation with a cache of compiled forms.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use handlebars::Handlebars;
use moka::future::Cache;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::model::Template;
use crate::document::renderer::RenderError;

const TEMPLATE_NAME: &str = "document";

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct CompileError(pub String);

/// A template compiled once and rendered many times.
pub struct CompiledTemplate {
    registry: Handlebars<'static>,
    version: DateTime<Utc>,
}

impl CompiledTemplate {
    pub fn compile(source: &str) -> Result<Self, CompileError> {
        Self::compile_versioned(source, Utc::now())
    }

    fn compile_versioned(source: &str, version: DateTime<Utc>) -> Result<Self, CompileError> {
        let mut registry = Handlebars::new();
        registry
            .register_template_string(TEMPLATE_NAME, source)
            .map_err(|e| CompileError(e.to_string()))?;
        Ok(Self { registry, version })
    }

    pub fn render(&self, data: &Value) -> Result<String, RenderError> {
        self.registry
            .render(TEMPLATE_NAME, data)
            .map_err(|e| RenderError::Template(e.to_string()))
    }
}

/// Compiles templates on demand and keeps the result keyed by template id.
///
/// A cached entry is only reused while its version matches the template's
/// `updated_at` (or `created_at` for never-updated templates).
#[derive(Clone)]
pub struct TemplateCompiler {
    cache: Cache<Uuid, Arc<CompiledTemplate>>,
}

impl Default for TemplateCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateCompiler {
    pub fn new() -> Self {
        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(10 * 60))
            .max_capacity(256)
            .build();
        Self { cache }
    }

    /// Check that `source` compiles without caching anything.
    pub fn validate(&self, source: &str) -> Result<(), CompileError> {
        CompiledTemplate::compile(source).map(|_| ())
    }

    pub async fn compiled(&self, template: &Template) -> Result<Arc<CompiledTemplate>, CompileError> {
        let version = template.version();
        if let Some(hit) = self.cache.get(&template.id).await {
            if hit.version == version {
                return Ok(hit);
            }
        }

        log::debug!("Compiling template {} (version {})", template.id, version);
        let compiled = Arc::new(CompiledTemplate::compile_versioned(&template.content, version)?);
        self.cache.insert(template.id, compiled.clone()).await;
        Ok(compiled)
    }

    pub async fn invalidate(&self, template_id: &Uuid) {
        self.cache.invalidate(template_id).await;
    }
}
