//! Console: user accounts, registration tokens, sessions and projects.
//!
//! A user signs up with a registration token, activates the account through the
//! token mailed to them, and then exchanges email and password for a session
//! token. [`Service::authorize`] turns a session token back into an
//! [`Authorization`] that project operations require.

use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use slog::Logger;
use thiserror::Error;
use uuid::Uuid;

pub mod auth;
pub mod payments;
pub mod web;

use crate::config::ConsoleConfig;
use crate::db::ConsoleDb;
use crate::error::{Result, SatelliteError};
use crate::mail::{MailService, Message};
use crate::time::unix_now;
use auth::{Claims, TokenKind, TokenSigner};
use payments::PaymentsService;

const ACTIVATION_TOKEN_TTL: Duration = Duration::from_secs(24 * 3600);

/// Console workflow failures.
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("registration token not found")]
    RegTokenNotFound,
    #[error("registration token already used")]
    RegTokenUsed,
    #[error("email {0} is already registered")]
    EmailUsed(String),
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("account is not activated")]
    InactiveAccount,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token expired")]
    TokenExpired,
    #[error("project limit of {0} reached")]
    ProjectLimit(usize),
    #[error("invalid {0}")]
    InvalidField(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Inactive,
    Active,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub full_name: String,
    pub short_name: String,
    pub email: String,
    pub password_hash: String,
    pub status: UserStatus,
    pub project_limit: usize,
    pub created_at: u64,
}

/// Sign-up request.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CreateUser {
    pub full_name: String,
    pub short_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationToken {
    pub secret: String,
    /// Set once a user signed up with this token.
    pub owner_id: Option<Uuid>,
    pub project_limit: usize,
    pub created_at: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub owner_id: Uuid,
    pub created_at: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub name: String,
    pub description: String,
}

/// An authenticated console caller.
#[derive(Clone, Debug)]
pub struct Authorization {
    pub user: User,
    pub claims: Claims,
}

pub struct Service {
    logger: Logger,
    db: Arc<dyn ConsoleDb>,
    signer: TokenSigner,
    mail: Arc<MailService>,
    payments: PaymentsService,
    config: ConsoleConfig,
}

impl Service {
    /// An empty `auth_token_secret` signs with a random per-process key.
    pub fn new(
        logger: Logger,
        db: Arc<dyn ConsoleDb>,
        mail: Arc<MailService>,
        payments: PaymentsService,
        config: ConsoleConfig,
    ) -> Self {
        let signer = if config.auth_token_secret.is_empty() {
            let mut secret = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut secret);
            TokenSigner::new(&secret)
        } else {
            TokenSigner::new(config.auth_token_secret.as_bytes())
        };
        Self {
            logger,
            db,
            signer,
            mail,
            payments,
            config,
        }
    }

    pub fn payments(&self) -> &PaymentsService {
        &self.payments
    }

    pub fn create_reg_token(&self, project_limit: usize) -> Result<RegistrationToken> {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        let token = RegistrationToken {
            secret: hex::encode(secret),
            owner_id: None,
            project_limit,
            created_at: unix_now(),
        };
        self.db.insert_registration_token(&token)?;
        Ok(token)
    }

    /// Registers an inactive user and binds the registration token to it.
    pub async fn create_user(&self, new_user: CreateUser, reg_token_secret: &str) -> Result<User> {
        if new_user.full_name.trim().is_empty() {
            return Err(ConsoleError::InvalidField("full name").into());
        }
        if !new_user.email.contains('@') {
            return Err(ConsoleError::InvalidField("email").into());
        }
        if new_user.password.is_empty() {
            return Err(ConsoleError::InvalidField("password").into());
        }

        let mut reg_token = self
            .db
            .get_registration_token(reg_token_secret)?
            .ok_or(ConsoleError::RegTokenNotFound)?;
        if reg_token.owner_id.is_some() {
            return Err(ConsoleError::RegTokenUsed.into());
        }
        if self.db.get_user_by_email(&new_user.email)?.is_some() {
            return Err(ConsoleError::EmailUsed(new_user.email).into());
        }

        let password_hash = hash_password(new_user.password, self.config.password_cost).await?;
        let user = User {
            id: Uuid::new_v4(),
            full_name: new_user.full_name,
            short_name: new_user.short_name,
            email: new_user.email,
            password_hash,
            status: UserStatus::Inactive,
            project_limit: reg_token.project_limit,
            created_at: unix_now(),
        };
        self.db.insert_user(&user)?;

        reg_token.owner_id = Some(user.id);
        self.db.update_registration_token(&reg_token)?;
        slog::info!(self.logger, "User registered"; "user" => %user.id);
        Ok(user)
    }

    /// Mints an activation token and mails it to the user.
    pub async fn generate_activation_token(&self, user_id: Uuid, email: &str) -> Result<String> {
        let token = self.signer.sign(&Claims {
            kind: TokenKind::Activation,
            user_id,
            email: email.to_string(),
            expires_at: unix_now() + ACTIVATION_TOKEN_TTL.as_secs(),
        })?;
        self.mail
            .send(Message {
                to: email.to_string(),
                subject: "Activate your account".to_string(),
                body: format!(
                    "{}/activation?token={token}",
                    self.config.external_address.trim_end_matches('/')
                ),
            })
            .await?;
        Ok(token)
    }

    pub fn activate_account(&self, activation_token: &str) -> Result<()> {
        let claims = self.signer.verify(activation_token)?;
        if claims.kind != TokenKind::Activation {
            return Err(ConsoleError::InvalidToken("not an activation token".to_string()).into());
        }
        let mut user = self.get_user(claims.user_id)?;
        if !user.email.eq_ignore_ascii_case(&claims.email) {
            return Err(ConsoleError::InvalidToken("email mismatch".to_string()).into());
        }
        if user.status == UserStatus::Active {
            return Ok(());
        }
        user.status = UserStatus::Active;
        self.db.update_user(&user)?;
        Ok(())
    }

    /// Exchanges credentials of an active user for a session token.
    pub async fn token(&self, email: &str, password: &str) -> Result<String> {
        let user = self
            .db
            .get_user_by_email(email)?
            .ok_or(ConsoleError::InvalidCredentials)?;
        if !verify_password(password.to_string(), user.password_hash.clone()).await? {
            return Err(ConsoleError::InvalidCredentials.into());
        }
        if user.status != UserStatus::Active {
            return Err(ConsoleError::InactiveAccount.into());
        }
        Ok(self.signer.sign(&Claims {
            kind: TokenKind::Session,
            user_id: user.id,
            email: user.email,
            expires_at: unix_now() + self.config.token_expiration.as_secs(),
        })?)
    }

    pub fn authorize(&self, token: &str) -> Result<Authorization> {
        let claims = self.signer.verify(token)?;
        if claims.kind != TokenKind::Session {
            return Err(ConsoleError::InvalidToken("not a session token".to_string()).into());
        }
        let user = self.get_user(claims.user_id)?;
        if user.status != UserStatus::Active {
            return Err(ConsoleError::InactiveAccount.into());
        }
        Ok(Authorization { user, claims })
    }

    pub fn get_user(&self, id: Uuid) -> Result<User> {
        self.db
            .get_user(&id)?
            .ok_or_else(|| SatelliteError::NotFound(format!("user {id}")))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<User> {
        self.db
            .get_user_by_email(email)?
            .ok_or_else(|| SatelliteError::NotFound(format!("user {email}")))
    }

    pub fn create_project(&self, auth: &Authorization, info: ProjectInfo) -> Result<Project> {
        if info.name.trim().is_empty() {
            return Err(ConsoleError::InvalidField("project name").into());
        }
        let owned = self.db.projects_by_owner(&auth.user.id)?.len();
        if owned >= auth.user.project_limit {
            return Err(ConsoleError::ProjectLimit(auth.user.project_limit).into());
        }
        let project = Project {
            id: Uuid::new_v4(),
            name: info.name,
            description: info.description,
            owner_id: auth.user.id,
            created_at: unix_now(),
        };
        self.db.insert_project(&project)?;
        slog::info!(self.logger, "Project created"; "project" => %project.id, "owner" => %auth.user.id);
        Ok(project)
    }

    pub fn get_users_projects(&self, auth: &Authorization) -> Result<Vec<Project>> {
        self.db.projects_by_owner(&auth.user.id)
    }
}

async fn hash_password(password: String, cost: u32) -> Result<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| SatelliteError::Task(e.to_string()))?
        .map_err(SatelliteError::from)
}

async fn verify_password(password: String, hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| SatelliteError::Task(e.to_string()))?
        .map_err(SatelliteError::from)
}
