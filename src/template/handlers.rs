use actix_web::{web, HttpResponse};
use uuid::Uuid;

use super::model::{CreateTemplateRequest, UpdateTemplateRequest};
use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::pagination::PageRequest;
use crate::AppState;

pub async fn list_templates(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
    query: web::Query<PageRequest>,
) -> Result<HttpResponse, AppError> {
    let page = state.templates.list(user.user_id, query.into_inner()).await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn create_template(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
    body: web::Json<CreateTemplateRequest>,
) -> Result<HttpResponse, AppError> {
    let template = state
        .templates
        .create(user.user_id, body.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(template))
}

pub async fn get_template(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let template = state.templates.get(path.into_inner(), user.user_id).await?;
    Ok(HttpResponse::Ok().json(template))
}

pub async fn update_template(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<UpdateTemplateRequest>,
) -> Result<HttpResponse, AppError> {
    let template = state
        .templates
        .update(path.into_inner(), user.user_id, body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(template))
}

/// Deletes the template and every document generated from it
pub async fn delete_template(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    state
        .templates
        .delete(path.into_inner(), user.user_id)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/templates")
            .route(web::get().to(list_templates))
            .route(web::post().to(create_template)),
    )
    .service(
        web::resource("/templates/{id}")
            .route(web::get().to(get_template))
            .route(web::put().to(update_template))
            .route(web::delete().to(delete_template)),
    );
}
