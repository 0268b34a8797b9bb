use actix_web::{web, HttpResponse};

use super::model::{LoginRequest, RefreshRequest, RegisterRequest};
use crate::error::AppError;
use crate::AppState;

/// Register a new account and sign it in
pub async fn register(
    state: web::Data<AppState>,
    body: web::Json<RegisterRequest>,
) -> Result<HttpResponse, AppError> {
    let tokens = state
        .auth
        .register(&body.username, &body.email, &body.password)
        .await?;
    Ok(HttpResponse::Created().json(tokens))
}

/// Login endpoint
pub async fn login(
    state: web::Data<AppState>,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse, AppError> {
    let tokens = state.auth.login(&body.username, &body.password).await?;
    Ok(HttpResponse::Ok().json(tokens))
}

/// Exchange a refresh token for a new token pair
pub async fn refresh_token(
    state: web::Data<AppState>,
    body: web::Json<RefreshRequest>,
) -> Result<HttpResponse, AppError> {
    let tokens = state.auth.refresh(&body.refresh_token).await?;
    Ok(HttpResponse::Ok().json(tokens))
}

/// Configure auth routes
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth")
            .route("/register", web::post().to(register))
            .route("/login", web::post().to(login))
            .route("/refresh", web::post().to(refresh_token)),
    );
}
