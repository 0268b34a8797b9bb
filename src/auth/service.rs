//! Account registration, login with lockout, and token refresh.

use std::sync::Arc;

use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use uuid::Uuid;

use super::jwt::{generate_access_token, generate_refresh_token, validate_token, REFRESH_TOKEN};
use super::model::{AuthResponse, User, ROLE_USER};
use crate::config::{JwtConfig, LockoutConfig};
use crate::db::{StoreError, UserStore};
use crate::error::AppError;
use crate::metrics;

const MIN_PASSWORD_LENGTH: usize = 8;

lazy_static! {
    static ref USERNAME_PATTERN: Regex = Regex::new(r"^[A-Za-z0-9_.-]{3,50}$").unwrap();
    static ref EMAIL_PATTERN: Regex =
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    jwt: JwtConfig,
    lockout: LockoutConfig,
    bcrypt_cost: u32,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        jwt: JwtConfig,
        lockout: LockoutConfig,
        bcrypt_cost: u32,
    ) -> Self {
        Self {
            users,
            jwt,
            lockout,
            bcrypt_cost,
        }
    }

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, AppError> {
        let username = username.trim();
        let email = email.trim();

        if !USERNAME_PATTERN.is_match(username) {
            return Err(AppError::Validation(
                "Username must be 3-50 characters of letters, digits, '_', '.' or '-'".to_string(),
            ));
        }
        if !EMAIL_PATTERN.is_match(email) {
            return Err(AppError::Validation("Email address is invalid".to_string()));
        }
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AppError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }

        if self.users.username_exists(username).await? {
            return Err(AppError::Conflict(format!("Username '{}' already exists", username)));
        }
        if self.users.email_exists(email).await? {
            return Err(AppError::Conflict(format!("Email '{}' already exists", email)));
        }

        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: hash_password(password, self.bcrypt_cost).await?,
            role: ROLE_USER.to_string(),
            refresh_token: None,
            refresh_token_expires_at: None,
            failed_login_attempts: 0,
            lockout_end: None,
            created_at: Utc::now(),
        };

        match self.users.insert_user(&user).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                return Err(AppError::Conflict("Username or email already exists".to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        log::info!("User registered successfully: {}", user.username);
        self.issue_tokens(&user).await
    }

    /// Authenticate with username and password.
    ///
    /// The lockout gate runs before the password is looked at: a locked account
    /// gets `AccountLocked` whatever password was supplied.
    pub async fn login(&self, username: &str, password: &str) -> Result<AuthResponse, AppError> {
        let user = match self.users.find_user_by_username(username.trim()).await? {
            Some(user) => user,
            None => {
                log::warn!("Failed login attempt for unknown username: {}", username);
                return Err(AppError::InvalidCredentials);
            }
        };

        let now = Utc::now();
        let stored = user.lockout_state();
        let admitted = match stored.admit(now) {
            Ok(state) => state,
            Err(until) => {
                log::warn!("Login rejected for locked account {} (until {})", user.username, until);
                return Err(AppError::AccountLocked { until });
            }
        };

        if !verify_password(password, &user.password_hash).await? {
            let next = self
                .users
                .record_failed_login(user.id, &self.lockout, Utc::now())
                .await?;

            match next.lockout_end {
                Some(until) if next.just_locked(&self.lockout) => {
                    metrics::ACCOUNT_LOCKOUTS.inc();
                    log::warn!(
                        "Account {} locked after {} failed attempts (until {})",
                        user.username,
                        next.failed_attempts,
                        until
                    );
                }
                _ => log::warn!(
                    "Failed login attempt {} for username: {}",
                    next.failed_attempts,
                    user.username
                ),
            }
            return Err(AppError::InvalidCredentials);
        }

        if !stored.is_clean() {
            self.users
                .save_lockout(user.id, &admitted.record_success())
                .await?;
        }

        log::info!("User logged in successfully: {}", user.username);
        self.issue_tokens(&user).await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse, AppError> {
        let claims = validate_token(refresh_token, &self.jwt).map_err(|e| {
            log::warn!("Invalid refresh token: {:?}", e);
            AppError::InvalidRefreshToken
        })?;
        if claims.token_type != REFRESH_TOKEN {
            return Err(AppError::InvalidRefreshToken);
        }

        let user = self
            .users
            .find_user_by_refresh_token(refresh_token)
            .await?
            .ok_or(AppError::InvalidRefreshToken)?;

        let expired = user
            .refresh_token_expires_at
            .map(|expiry| expiry <= Utc::now())
            .unwrap_or(true);
        if expired || user.id.to_string() != claims.sub {
            log::warn!("Invalid refresh token attempt for user {}", user.username);
            return Err(AppError::InvalidRefreshToken);
        }

        log::info!("Token refreshed for user: {}", user.username);
        self.issue_tokens(&user).await
    }

    /// Issue a new token pair and store the refresh token, replacing any previous one.
    async fn issue_tokens(&self, user: &User) -> Result<AuthResponse, AppError> {
        let access = generate_access_token(user, &self.jwt).map_err(|e| {
            log::error!("Failed to generate access token: {:?}", e);
            AppError::Internal("Failed to generate token".to_string())
        })?;
        let refresh = generate_refresh_token(user, &self.jwt).map_err(|e| {
            log::error!("Failed to generate refresh token: {:?}", e);
            AppError::Internal("Failed to generate token".to_string())
        })?;

        self.users
            .save_refresh_token(user.id, &refresh.token, refresh.expires_at)
            .await?;

        Ok(AuthResponse {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: "Bearer".to_string(),
            expires_in: (access.expires_at - Utc::now()).num_seconds().max(0),
            expires_at: access.expires_at,
        })
    }
}

async fn hash_password(password: &str, cost: u32) -> Result<String, AppError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| AppError::Internal(format!("password hashing task failed: {}", e)))?
        .map_err(|e| {
            log::error!("Failed to hash password: {:?}", e);
            AppError::Internal("Failed to hash password".to_string())
        })
}

async fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let password = password.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| AppError::Internal(format!("password verification task failed: {}", e)))?
        .map_err(|e| {
            log::error!("Stored password hash is unusable: {:?}", e);
            AppError::Internal("Failed to verify credentials".to_string())
        })
}
