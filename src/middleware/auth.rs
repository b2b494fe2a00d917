use actix_web::http::{Method, StatusCode};
use actix_web::{dev::Payload, web, FromRequest, HttpRequest, HttpResponse, ResponseError};
use futures::future::LocalBoxFuture;
use sea_orm::DbErr;
use serde::Serialize;
use thiserror::Error;

use crate::models::users::Role;
use crate::state::AppState;

/// Authenticated caller, available to every protected handler.
///
/// Used as an extractor it runs [`require_auth`] with the default options
/// (CSRF enforced on POST/PUT/PATCH/DELETE):
///
/// ```ignore
/// #[get("/me")]
/// async fn me(auth: AuthUser) -> HttpResponse { ... }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthUser {
    pub user_id: i32,
    pub user_email: String,
    pub user_role: Role,
    pub session_id: String,
}

/// Same as [`AuthUser`], but the caller must be an admin.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

/// Why a request was turned away. Never a panic, always a response.
#[derive(Debug, Error)]
pub enum AuthRejection {
    #[error("Invalid CSRF token")]
    InvalidCsrf,

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Insufficient permissions")]
    InsufficientRole,

    #[error("Authentication unavailable: {0}")]
    Storage(#[from] DbErr),

    #[error("Authentication misconfigured: {0}")]
    Misconfigured(&'static str),
}

impl ResponseError for AuthRejection {
    fn status_code(&self) -> StatusCode {
        match self {
            AuthRejection::InvalidCsrf | AuthRejection::InsufficientRole => StatusCode::FORBIDDEN,
            AuthRejection::Unauthenticated => StatusCode::UNAUTHORIZED,
            AuthRejection::Storage(_) | AuthRejection::Misconfigured(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "authentication failed internally");
            return HttpResponse::build(status).json(serde_json::json!({
                "error": "Internal server error"
            }));
        }
        HttpResponse::build(status).json(serde_json::json!({ "error": self.to_string() }))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AuthOptions {
    pub require_csrf: bool,
    pub require_role: Option<Role>,
    pub require_admin: bool,
}

impl Default for AuthOptions {
    fn default() -> Self {
        AuthOptions {
            require_csrf: true,
            require_role: None,
            require_admin: false,
        }
    }
}

fn is_mutating(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}

/// CSRF first (mutating methods only), then the session.
pub async fn authenticate_request(
    req: &HttpRequest,
    state: &AppState,
    require_csrf: bool,
) -> Result<AuthUser, AuthRejection> {
    if require_csrf && is_mutating(req.method()) && !state.csrf.validate_request(req) {
        tracing::debug!(path = %req.path(), "csrf validation failed");
        return Err(AuthRejection::InvalidCsrf);
    }

    let validated = state
        .sessions
        .get_session_from_request(req)
        .await?
        .ok_or(AuthRejection::Unauthenticated)?;

    Ok(AuthUser {
        user_id: validated.user.id,
        user_email: validated.user.email,
        // The row, not the token, is current after a role change
        user_role: validated.user.role,
        session_id: validated.payload.session_id,
    })
}

pub fn require_role(user_role: Role, required_role: Role) -> bool {
    user_role.at_least(required_role)
}

pub fn require_admin(user_role: Role) -> bool {
    user_role == Role::Admin
}

pub async fn require_auth(
    req: &HttpRequest,
    state: &AppState,
    options: AuthOptions,
) -> Result<AuthUser, AuthRejection> {
    let auth = authenticate_request(req, state, options.require_csrf).await?;

    if options.require_admin && !require_admin(auth.user_role) {
        return Err(AuthRejection::InsufficientRole);
    }
    if let Some(required) = options.require_role {
        if !require_role(auth.user_role, required) {
            return Err(AuthRejection::InsufficientRole);
        }
    }
    Ok(auth)
}

fn extract(req: &HttpRequest, options: AuthOptions) -> LocalBoxFuture<'static, Result<AuthUser, AuthRejection>> {
    let req = req.clone();
    Box::pin(async move {
        let state = req
            .app_data::<web::Data<AppState>>()
            .cloned()
            .ok_or(AuthRejection::Misconfigured("AppState is not registered"))?;
        require_auth(&req, &state, options).await
    })
}

impl FromRequest for AuthUser {
    type Error = AuthRejection;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        extract(req, AuthOptions::default())
    }
}

impl FromRequest for AdminUser {
    type Error = AuthRejection;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let fut = extract(
            req,
            AuthOptions {
                require_admin: true,
                ..AuthOptions::default()
            },
        );
        Box::pin(async move { fut.await.map(AdminUser) })
    }
}
