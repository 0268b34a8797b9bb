use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Document row. `storage_path` is relative to the storage root and never changes.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Document {
    pub id: Uuid,
    pub user_id: Uuid,
    pub template_id: Uuid,
    pub storage_path: String,
    pub generated_at: DateTime<Utc>,
    /// Generation input, serialized as JSON.
    pub metadata: String,
}

/// Document row joined with its template's name, if the template still exists.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DocumentWithTemplate {
    #[sqlx(flatten)]
    pub document: Document,
    pub template_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentView {
    pub id: Uuid,
    pub template_id: Uuid,
    pub template_name: String,
    pub user_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub download_url: String,
    pub file_name: String,
    pub metadata: String,
}

impl DocumentView {
    pub fn new(document: Document, template_name: Option<String>) -> Self {
        Self {
            download_url: download_url(&document.id),
            template_name: template_name.unwrap_or_else(|| "Unknown".to_string()),
            id: document.id,
            template_id: document.template_id,
            user_id: document.user_id,
            generated_at: document.generated_at,
            file_name: document.storage_path,
            metadata: document.metadata,
        }
    }
}

impl From<DocumentWithTemplate> for DocumentView {
    fn from(row: DocumentWithTemplate) -> Self {
        Self::new(row.document, row.template_name)
    }
}

pub fn download_url(id: &Uuid) -> String {
    format!("/api/documents/{}/download", id)
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    pub template_id: Uuid,
    pub data: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchGenerateRequest {
    pub template_id: Uuid,
    pub data_items: Vec<Value>,
}

/// Outcome of a committed batch. Under the strict policy a failed batch is an
/// error, so `failure_count` is always zero here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchGenerationResult {
    pub total_requested: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub documents: Vec<DocumentView>,
}

/// File bytes ready to be sent to the client.
#[derive(Debug)]
pub struct DocumentFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}
