use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::{
    database::AccountStore,
    errors::{AppError, Result},
    models::{LoginRequest, RegisterRequest, UpdateProfileRequest, User},
};

pub mod jwt;
pub mod password;
pub mod session;

pub use jwt::*;
pub use password::*;
pub use session::*;

/// Who is behind a session token.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub session_id: Uuid,
    pub user: User,
    /// Unix time after which the session token is no longer accepted.
    pub expires_at: i64,
}

/// A newly opened session.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub token: String,
    pub session_id: Uuid,
    pub user: User,
}

/// Authentication collaborator. The job workflow never infers identity on its
/// own; it only consumes what this returns.
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Resolves a token to the current user, or `AppError::Auth` when the
    /// caller is unauthenticated.
    async fn check_session(&self, token: &str) -> Result<SessionIdentity>;

    async fn register(&self, request: RegisterRequest) -> Result<AuthSession>;

    async fn login(&self, request: LoginRequest) -> Result<AuthSession>;

    /// Ends the session behind `token` and returns its id.
    async fn logout(&self, token: &str) -> Result<Uuid>;

    /// Changes display name and email of an account.
    async fn update_profile(&self, user_id: Uuid, request: UpdateProfileRequest) -> Result<User>;
}

/// Password accounts with bcrypt hashes and JWT session tokens.
pub struct AccountAuth {
    store: Arc<dyn AccountStore>,
    jwt: JwtService,
    /// Logged-out session ids until their tokens would have expired anyway.
    ended_sessions: RwLock<HashMap<Uuid, i64>>,
}

impl AccountAuth {
    pub fn new(store: Arc<dyn AccountStore>, jwt_secret: &str) -> Self {
        Self {
            store,
            jwt: JwtService::new(jwt_secret),
            ended_sessions: RwLock::new(HashMap::new()),
        }
    }

    fn open_session(&self, user: User) -> Result<AuthSession> {
        let session_id = Uuid::new_v4();
        let token = self.jwt.generate_session_token(user.id, session_id, &user.email)?;

        tracing::info!(user_id = %user.id, session_id = %session_id, "Session opened");
        Ok(AuthSession {
            token,
            session_id,
            user,
        })
    }

    fn is_ended(&self, session_id: Uuid) -> bool {
        self.ended_sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&session_id)
    }

    /// Records `session_id` as ended and forgets entries whose tokens no
    /// longer verify.
    fn end_session(&self, session_id: Uuid, expires_at: i64) {
        let now = Utc::now().timestamp();
        let leeway = TOKEN_LEEWAY_SECS as i64;

        let mut ended = self.ended_sessions.write().unwrap_or_else(|e| e.into_inner());
        ended.retain(|_, exp| *exp + leeway >= now);
        ended.insert(session_id, expires_at);
    }
}

#[async_trait]
impl AuthService for AccountAuth {
    async fn check_session(&self, token: &str) -> Result<SessionIdentity> {
        let claims = self.jwt.verify_token(token)?;
        let session_id = claims.session_id()?;
        if self.is_ended(session_id) {
            return Err(AppError::Auth("Session has ended".to_string()));
        }

        let user = self
            .store
            .find_by_id(claims.user_id()?)
            .await?
            .ok_or_else(|| AppError::Auth("User not found".to_string()))?;

        Ok(SessionIdentity {
            session_id,
            user,
            expires_at: claims.exp,
        })
    }

    async fn register(&self, request: RegisterRequest) -> Result<AuthSession> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("Name is required".to_string()));
        }
        let email = request.email.trim().to_lowercase();
        PasswordService::validate_email(&email)?;
        PasswordService::validate_password_strength(&request.password)?;

        if self.store.find_by_email(&email).await?.is_some() {
            return Err(AppError::Validation(
                "An account with this email already exists".to_string(),
            ));
        }

        let password_hash = PasswordService::hash_password(&request.password)?;
        let user = self
            .store
            .create_user(&User::new(name, &email, password_hash))
            .await?;

        tracing::info!(user_id = %user.id, "User registered");
        self.open_session(user)
    }

    async fn login(&self, request: LoginRequest) -> Result<AuthSession> {
        let email = request.email.trim().to_lowercase();
        let user = self
            .store
            .find_by_email(&email)
            .await?
            .ok_or_else(|| AppError::Auth("Invalid email or password".to_string()))?;

        if !PasswordService::verify_password(&request.password, &user.password_hash)? {
            return Err(AppError::Auth("Invalid email or password".to_string()));
        }

        self.open_session(user)
    }

    async fn logout(&self, token: &str) -> Result<Uuid> {
        let claims = self.jwt.verify_token(token)?;
        let session_id = claims.session_id()?;
        self.end_session(session_id, claims.exp);

        tracing::info!(session_id = %session_id, user_id = %claims.sub, "Session ended");
        Ok(session_id)
    }

    async fn update_profile(&self, user_id: Uuid, request: UpdateProfileRequest) -> Result<User> {
        let current = self
            .store
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::Auth("User not found".to_string()))?;

        let name = match request.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => current.name.clone(),
        };
        let email = match request.email.as_deref().map(|e| e.trim().to_lowercase()) {
            Some(email) if !email.is_empty() => {
                PasswordService::validate_email(&email)?;
                email
            }
            _ => current.email.clone(),
        };

        let updated = self.store.update_profile(user_id, &name, &email).await?;
        tracing::info!(user_id = %user_id, email_changed = updated.email != current.email, "Profile updated");
        Ok(updated)
    }
}
