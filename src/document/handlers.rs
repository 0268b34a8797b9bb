use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpResponse};
use uuid::Uuid;

use super::model::{BatchGenerateRequest, GenerateRequest};
use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::pagination::PageRequest;
use crate::AppState;

pub async fn generate_document(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
    body: web::Json<GenerateRequest>,
) -> Result<HttpResponse, AppError> {
    let request = body.into_inner();
    let document = state
        .documents
        .generate(request.template_id, user.user_id, request.data)
        .await?;
    Ok(HttpResponse::Created().json(document))
}

/// All items succeed or the whole batch fails
pub async fn generate_batch(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
    body: web::Json<BatchGenerateRequest>,
) -> Result<HttpResponse, AppError> {
    let request = body.into_inner();
    let result = state
        .documents
        .generate_batch(request.template_id, user.user_id, request.data_items)
        .await?;
    Ok(HttpResponse::Created().json(result))
}

pub async fn list_documents(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
    query: web::Query<PageRequest>,
) -> Result<HttpResponse, AppError> {
    let page = state
        .documents
        .list_documents(user.user_id, query.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn get_document(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let document = state
        .documents
        .get_document(path.into_inner(), user.user_id)
        .await?;
    Ok(HttpResponse::Ok().json(document))
}

pub async fn download_document(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let file = state
        .documents
        .read_file(path.into_inner(), user.user_id)
        .await?;

    Ok(HttpResponse::Ok()
        .content_type("application/pdf")
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(file.file_name)],
        })
        .body(file.bytes))
}

pub async fn delete_document(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    state
        .documents
        .delete_document(path.into_inner(), user.user_id)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/documents")
            .route("", web::get().to(list_documents))
            .route("/generate", web::post().to(generate_document))
            .route("/generate-batch", web::post().to(generate_batch))
            .route("/{id}", web::get().to(get_document))
            .route("/{id}", web::delete().to(delete_document))
            .route("/{id}/download", web::get().to(download_document)),
    );
}
