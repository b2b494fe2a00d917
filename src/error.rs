use std::collections::BTreeMap;

use actix_web::body::MessageBody;
use actix_web::dev::ServiceResponse;
use actix_web::middleware::ErrorHandlerResponse;
use actix_web::{http::StatusCode, web, HttpResponse, ResponseError};
use sea_orm::DbErr;
use thiserror::Error;
use validator::ValidationErrors;

use crate::middleware::auth::AuthRejection;
use crate::services::session_service::SessionError;
use crate::state::AppState;
use crate::utils::password::PasswordError;

/// Handler-level errors. Every variant maps to exactly one status code.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation failed")]
    Validation(#[from] ValidationErrors),

    #[error("{0}")]
    BadRequest(String),

    #[error("Invalid or expired OTP")]
    InvalidOtp,

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Too many failed attempts. Please request a new code.")]
    TooManyAttempts,

    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Password error: {0}")]
    Password(#[from] PasswordError),

    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("{0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Database(e) => AppError::Database(e),
            SessionError::Token(e) => AppError::Token(e),
        }
    }
}

impl From<AuthRejection> for AppError {
    fn from(rejection: AuthRejection) -> Self {
        match rejection {
            AuthRejection::InvalidCsrf | AuthRejection::InsufficientRole => {
                AppError::Forbidden(rejection.to_string())
            }
            AuthRejection::Unauthenticated => AppError::Unauthorized(rejection.to_string()),
            AuthRejection::Storage(e) => AppError::Database(e),
            AuthRejection::Misconfigured(reason) => AppError::Internal(reason.to_string()),
        }
    }
}

fn field_messages(errors: &ValidationErrors) -> BTreeMap<String, Vec<String>> {
    errors
        .field_errors()
        .into_iter()
        .map(|(field, errs)| {
            let messages = errs
                .iter()
                .map(|e| match &e.message {
                    Some(message) => message.to_string(),
                    None => format!("invalid ({})", e.code),
                })
                .collect();
            (field.to_string(), messages)
        })
        .collect()
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::BadRequest(_) | AppError::InvalidOtp => {
                StatusCode::BAD_REQUEST
            }
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::TooManyAttempts => StatusCode::TOO_MANY_REQUESTS,
            AppError::Database(_)
            | AppError::Password(_)
            | AppError::Token(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let body = match self {
            AppError::Validation(errors) => serde_json::json!({
                "error": self.to_string(),
                "fields": field_messages(errors),
            }),
            _ if status == StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!(error = %self, "internal error");
                serde_json::json!({ "error": "Internal server error" })
            }
            _ => serde_json::json!({ "error": self.to_string() }),
        };

        HttpResponse::build(status).json(body)
    }
}

/// `ErrorHandlers` hook for 500 responses: outside production the body
/// gains a `details` field with the underlying error text. Works for every
/// error type that reaches a response, extractor rejections included.
pub fn expose_error_details<B: MessageBody + 'static>(
    res: ServiceResponse<B>,
) -> actix_web::Result<ErrorHandlerResponse<B>> {
    let expose = res
        .request()
        .app_data::<web::Data<AppState>>()
        .is_some_and(|state| !state.config.is_production());
    let details = match res.response().error() {
        Some(err) if expose => err.to_string(),
        _ => return Ok(ErrorHandlerResponse::Response(res.map_into_left_body())),
    };

    let (req, res) = res.into_parts();
    let body = HttpResponse::build(res.status()).json(serde_json::json!({
        "error": "Internal server error",
        "details": details,
    }));
    Ok(ErrorHandlerResponse::Response(
        ServiceResponse::new(req, body).map_into_right_body(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::services::otp_service::LogOtpSender;
    use crate::test_support::{test_config, test_db};
    use actix_web::middleware::ErrorHandlers;
    use actix_web::{get, test, App};
    use std::sync::Arc;
    use validator::Validate;

    #[derive(Validate)]
    struct PasswordForm {
        #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
        password: String,
    }

    #[::core::prelude::v1::test]
    fn test_status_codes() {
        assert_eq!(AppError::InvalidOtp.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::TooManyAttempts.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(AppError::Conflict("dup".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(AppError::NotFound("nope".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::Database(DbErr::Custom("down".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[::core::prelude::v1::test]
    fn test_auth_rejection_keeps_status() {
        let forbidden: AppError = AuthRejection::InvalidCsrf.into();
        assert_eq!(forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(forbidden.to_string(), "Invalid CSRF token");

        let unauthorized: AppError = AuthRejection::Unauthenticated.into();
        assert_eq!(unauthorized.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[::core::prelude::v1::test]
    fn test_validation_fields() {
        let errors = PasswordForm { password: "short".into() }.validate().unwrap_err();
        let fields = field_messages(&errors);
        assert_eq!(
            fields.get("password"),
            Some(&vec!["Password must be at least 8 characters".to_string()])
        );
    }

    #[get("/boom")]
    async fn boom() -> AppResult<HttpResponse> {
        Err(AppError::Internal("ledger offline".to_string()))
    }

    async fn call_boom(environment: Environment) -> serde_json::Value {
        let mut config = test_config();
        config.environment = environment;
        let state = AppState::new(test_db().await, config, Arc::new(LogOtpSender::new(false))).unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .wrap(ErrorHandlers::new().handler(StatusCode::INTERNAL_SERVER_ERROR, expose_error_details))
                .service(boom),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/boom").to_request()).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        test::read_body_json(resp).await
    }

    #[actix_web::test]
    async fn test_internal_details_follow_environment() {
        let development = call_boom(Environment::Development).await;
        assert_eq!(development["error"], "Internal server error");
        assert_eq!(development["details"], "ledger offline");

        let production = call_boom(Environment::Production).await;
        assert_eq!(production["error"], "Internal server error");
        assert!(production.get("details").is_none());
    }
}
