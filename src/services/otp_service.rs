//! One-time codes for registration and password reset.
//!
//! A code lives until it is used, expires, or collects five failed guesses.
//! Wrong guesses are charged to every open code of the email, so guessing
//! against a 6 digit space stops after five tries per outstanding code.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::Rng;
use sea_orm::sea_query::Expr;
use sea_orm::*;

use crate::error::{AppError, AppResult};
use crate::models::otp_verifications::{self, OtpPurpose, MAX_ATTEMPTS};
use crate::models::users::{self, Role};
use crate::services::session_info::SessionInfo;
use crate::services::session_service::{IssuedSession, SessionService};
use crate::services::user_service::{normalize_email, NewUser, UserService};
use crate::utils::csrf::CsrfService;

/// Delivers a freshly issued code to its owner.
#[async_trait]
pub trait OtpSender: Send + Sync {
    async fn send(&self, email: &str, code: &str, purpose: OtpPurpose) -> AppResult<()>;
}

/// Writes issued codes to the log. The code itself is only included when
/// `reveal_code` is set (never in production).
pub struct LogOtpSender {
    reveal_code: bool,
}

impl LogOtpSender {
    pub fn new(reveal_code: bool) -> Self {
        LogOtpSender { reveal_code }
    }
}

#[async_trait]
impl OtpSender for LogOtpSender {
    async fn send(&self, email: &str, code: &str, purpose: OtpPurpose) -> AppResult<()> {
        if self.reveal_code {
            tracing::info!(%email, ?purpose, %code, "otp issued");
        } else {
            tracing::info!(%email, ?purpose, "otp issued");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct VerifyOtpInput {
    pub email: String,
    pub code: String,
    pub name: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug)]
pub enum OtpOutcome {
    Registered {
        user: users::Model,
        issued: IssuedSession,
        csrf_token: String,
    },
    PasswordReset {
        revoked_sessions: u64,
    },
    Verified {
        purpose: OtpPurpose,
    },
}

/// What the purpose-specific branch needs, checked before the code is spent.
enum Plan {
    Register { name: String, password: String },
    Reset { user: users::Model, password: String },
    Acknowledge,
}

#[derive(Clone)]
pub struct OtpService {
    db: DatabaseConnection,
    sessions: SessionService,
    csrf: CsrfService,
    sender: Arc<dyn OtpSender>,
    ttl: Duration,
}

fn generate_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

fn present(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl OtpService {
    pub fn new(
        db: DatabaseConnection,
        sessions: SessionService,
        csrf: CsrfService,
        sender: Arc<dyn OtpSender>,
        ttl: Duration,
    ) -> Self {
        OtpService { db, sessions, csrf, sender, ttl }
    }

    /// Stores a new code and hands it to the sender.
    pub async fn issue_otp(&self, email: &str, purpose: OtpPurpose) -> AppResult<otp_verifications::Model> {
        let email = normalize_email(email);
        let now = Utc::now().naive_utc();

        let otp = otp_verifications::ActiveModel {
            email: Set(email.clone()),
            code: Set(generate_code()),
            purpose: Set(purpose),
            verified: Set(false),
            attempts: Set(0),
            expires_at: Set(now + self.ttl),
            user_id: Set(None),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;

        self.sender.send(&email, &otp.code, purpose).await?;
        Ok(otp)
    }

    /// Issues a code when it can lead somewhere: no registration code for a
    /// taken email, no reset code for an unknown one. Callers answer the same
    /// way either way so the endpoint does not reveal which emails exist.
    pub async fn request_otp(&self, email: &str, purpose: OtpPurpose) -> AppResult<bool> {
        let existing = UserService::find_by_email(&self.db, email).await?;
        let wanted = match purpose {
            OtpPurpose::Registration => existing.is_none(),
            OtpPurpose::PasswordReset => existing.is_some_and(|u| u.is_active),
            OtpPurpose::EmailVerification => true,
        };

        if wanted {
            self.issue_otp(email, purpose).await?;
        } else {
            tracing::debug!(?purpose, "otp request ignored");
        }
        Ok(wanted)
    }

    async fn find_open_code(&self, email: &str, code: &str) -> Result<Option<otp_verifications::Model>, DbErr> {
        otp_verifications::Entity::find()
            .filter(otp_verifications::Column::Email.eq(email))
            .filter(otp_verifications::Column::Code.eq(code))
            .filter(otp_verifications::Column::Verified.eq(false))
            .filter(otp_verifications::Column::ExpiresAt.gt(Utc::now().naive_utc()))
            .order_by_desc(otp_verifications::Column::CreatedAt)
            .order_by_desc(otp_verifications::Column::Id)
            .one(&self.db)
            .await
    }

    async fn charge_failed_attempt(&self, email: &str) -> Result<u64, DbErr> {
        let result = otp_verifications::Entity::update_many()
            .col_expr(
                otp_verifications::Column::Attempts,
                Expr::col(otp_verifications::Column::Attempts).add(1),
            )
            .filter(otp_verifications::Column::Email.eq(email))
            .filter(otp_verifications::Column::Verified.eq(false))
            .filter(otp_verifications::Column::Attempts.lt(MAX_ATTEMPTS))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    async fn plan(&self, purpose: OtpPurpose, email: &str, input: &VerifyOtpInput) -> AppResult<Plan> {
        match purpose {
            OtpPurpose::Registration => {
                let (Some(name), Some(password)) = (present(&input.name), present(&input.password))
                else {
                    return Err(AppError::BadRequest(
                        "Name and password are required for registration".to_string(),
                    ));
                };
                if UserService::find_by_email(&self.db, email).await?.is_some() {
                    return Err(AppError::Conflict("User with this email already exists".to_string()));
                }
                Ok(Plan::Register { name, password })
            }
            OtpPurpose::PasswordReset => {
                let Some(password) = present(&input.password) else {
                    return Err(AppError::BadRequest(
                        "Password is required for password reset".to_string(),
                    ));
                };
                let user = UserService::find_by_email(&self.db, email)
                    .await?
                    .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
                Ok(Plan::Reset { user, password })
            }
            OtpPurpose::EmailVerification => Ok(Plan::Acknowledge),
        }
    }

    /// Spends the code. Conditional on it still being open, so two requests
    /// racing on one code cannot both win.
    async fn consume(&self, otp: &otp_verifications::Model) -> AppResult<()> {
        let result = otp_verifications::Entity::update_many()
            .col_expr(otp_verifications::Column::Verified, Expr::value(true))
            .filter(otp_verifications::Column::Id.eq(otp.id))
            .filter(otp_verifications::Column::Verified.eq(false))
            .filter(otp_verifications::Column::Attempts.lt(MAX_ATTEMPTS))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 1 {
            Ok(())
        } else {
            Err(AppError::InvalidOtp)
        }
    }

    pub async fn verify_otp(&self, input: &VerifyOtpInput, info: SessionInfo) -> AppResult<OtpOutcome> {
        let email = normalize_email(&input.email);

        let Some(otp) = self.find_open_code(&email, input.code.trim()).await? else {
            let charged = self.charge_failed_attempt(&email).await?;
            tracing::warn!(%email, charged, "otp mismatch");
            return Err(AppError::InvalidOtp);
        };

        if otp.attempts >= MAX_ATTEMPTS {
            tracing::warn!(%email, otp_id = otp.id, "otp attempts exhausted");
            return Err(AppError::TooManyAttempts);
        }

        let plan = self.plan(otp.purpose, &email, input).await?;
        self.consume(&otp).await?;

        match plan {
            Plan::Register { name, password } => {
                let user = UserService::create_user(
                    &self.db,
                    NewUser {
                        email: email.clone(),
                        name,
                        password,
                        role: Role::DEFAULT,
                        created_by: None,
                    },
                )
                .await?;

                let mut linked: otp_verifications::ActiveModel = otp.into();
                linked.user_id = Set(Some(user.id));
                linked.update(&self.db).await?;

                let mut active: users::ActiveModel = user.into();
                active.last_login_at = Set(Some(Utc::now().naive_utc()));
                let user = active.update(&self.db).await?;

                let issued = self.sessions.create_session(&user, info).await?;
                let csrf_token = self.csrf.generate_token();
                tracing::info!(user_id = user.id, "registration completed");

                Ok(OtpOutcome::Registered { user, issued, csrf_token })
            }
            Plan::Reset { user, password } => {
                let user = UserService::set_password(&self.db, user, &password).await?;
                let revoked_sessions = self.sessions.revoke_all_user_sessions(user.id, None).await?;
                tracing::info!(user_id = user.id, revoked_sessions, "password reset");

                Ok(OtpOutcome::PasswordReset { revoked_sessions })
            }
            Plan::Acknowledge => Ok(OtpOutcome::Verified { purpose: otp.purpose }),
        }
    }
}
