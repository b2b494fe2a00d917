use actix_web::{delete, get, post, web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::models::otp_verifications::OtpPurpose;
use crate::models::sessions;
use crate::models::users::PublicUser;
use crate::services::otp_service::{OtpOutcome, VerifyOtpInput};
use crate::services::session_info::extract_session_info;
use crate::services::session_service::{IssuedSession, REFRESH_COOKIE};
use crate::services::user_service::UserService;
use crate::state::AppState;
use crate::utils::cookies;

// DTO for requesting a code
#[derive(Debug, Deserialize, Validate)]
pub struct RequestOtpRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    pub purpose: OtpPurpose,
}

// DTO for the OTP endpoint
#[derive(Debug, Deserialize, Validate)]
pub struct VerifyOtpRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(equal = 6, message = "OTP must be 6 digits"))]
    pub otp: String,
    #[validate(length(min = 1, max = 120, message = "Name must be between 1 and 120 characters"))]
    pub name: Option<String>,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

// Session as listed to its owner
#[derive(Serialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: sessions::Model,
    pub current: bool,
}

impl VerifyOtpRequest {
    /// Derive-level rules plus the digits-only check on the code.
    fn check(&self) -> Result<(), ValidationErrors> {
        let mut errors = self.validate().err().unwrap_or_else(ValidationErrors::new);
        if !self.otp.chars().all(|c| c.is_ascii_digit()) {
            let mut error = ValidationError::new("digits");
            error.message = Some("OTP must contain only digits".into());
            errors.add("otp", error);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn signed_in(state: &AppState, issued: IssuedSession, csrf_token: String, created: bool, body: serde_json::Value) -> HttpResponse {
    let mut response = if created { HttpResponse::Created() } else { HttpResponse::Ok() };
    cookies::set_auth_cookies(
        &mut response,
        issued.access_token,
        issued.refresh_token,
        csrf_token,
        state.secure_cookies(),
        state.sessions.tokens(),
    );
    response.json(body)
}

/// GET /auth/csrf - Issue a CSRF token (PUBLIC)
#[get("/csrf")]
pub async fn issue_csrf(state: web::Data<AppState>) -> HttpResponse {
    let token = state.csrf.generate_token();
    HttpResponse::Ok()
        .cookie(cookies::csrf_cookie(token.clone(), state.secure_cookies()))
        .json(serde_json::json!({ "csrf_token": token }))
}

/// POST /auth/request-otp - Send a one-time code (PUBLIC)
///
/// Same answer whether or not a code went out.
#[post("/request-otp")]
pub async fn request_otp(
    body: web::Json<RequestOtpRequest>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    body.validate()?;
    state.otp.request_otp(&body.email, body.purpose).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "If this email is eligible, a verification code has been sent"
    })))
}

/// POST /auth/verify-otp - Complete registration or password reset (PUBLIC)
#[post("/verify-otp")]
pub async fn verify_otp(
    req: HttpRequest,
    body: web::Json<VerifyOtpRequest>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    body.check()?;

    let body = body.into_inner();
    let input = VerifyOtpInput {
        email: body.email,
        code: body.otp,
        name: body.name,
        password: body.password,
    };
    let info = extract_session_info(&req, state.classifier.as_ref());

    let response = match state.otp.verify_otp(&input, info).await? {
        OtpOutcome::Registered { user, issued, csrf_token } => {
            let payload = serde_json::json!({
                "success": true,
                "message": "Registration successful",
                "user": PublicUser::from(&user),
                "csrf_token": csrf_token,
            });
            signed_in(&state, issued, csrf_token, true, payload)
        }
        OtpOutcome::PasswordReset { revoked_sessions } => {
            let mut response = HttpResponse::Ok();
            cookies::clear_auth_cookies(&mut response);
            response.json(serde_json::json!({
                "success": true,
                "message": "Password reset successful. Please log in with your new password.",
                "sessions_revoked": revoked_sessions
            }))
        }
        OtpOutcome::Verified { purpose } => HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "message": "Verification successful",
            "purpose": purpose
        })),
    };
    Ok(response)
}

/// POST /auth/login - Open a session (PUBLIC)
#[post("/login")]
pub async fn login(
    req: HttpRequest,
    body: web::Json<LoginRequest>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    body.validate()?;

    let Some(user) = UserService::authenticate(&state.db, &body.email, &body.password).await? else {
        tracing::info!("login rejected");
        return Err(AppError::Unauthorized("Invalid email or password".to_string()));
    };

    let info = extract_session_info(&req, state.classifier.as_ref());
    let issued = state.sessions.create_session(&user, info).await?;
    let csrf_token = state.csrf.generate_token();
    tracing::info!(user_id = user.id, session_id = %issued.session.id, "login");

    let payload = serde_json::json!({
        "success": true,
        "user": PublicUser::from(&user),
        "csrf_token": csrf_token,
    });
    Ok(signed_in(&state, issued, csrf_token, false, payload))
}

/// POST /auth/refresh - Rotate the token pair (PUBLIC, refresh token required)
///
/// Browsers send the refresh cookie and must echo the CSRF token. API
/// clients post `{"refresh_token": ...}` and get the new pair in the body.
#[post("/refresh")]
pub async fn refresh(
    req: HttpRequest,
    body: Option<web::Json<RefreshRequest>>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let unauthorized = || AppError::Unauthorized("Invalid or expired refresh token".to_string());

    if let Some(body) = body {
        let refreshed = state
            .sessions
            .refresh_session(&body.refresh_token)
            .await?
            .ok_or_else(unauthorized)?;
        return Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "user": PublicUser::from(&refreshed.user),
            "access_token": refreshed.issued.access_token,
            "refresh_token": refreshed.issued.refresh_token,
        })));
    }

    let token = req
        .cookie(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(unauthorized)?;
    if !state.csrf.validate_request(&req) {
        return Err(AppError::Forbidden("Invalid CSRF token".to_string()));
    }

    let refreshed = state
        .sessions
        .refresh_session(&token)
        .await?
        .ok_or_else(unauthorized)?;

    let secure = state.secure_cookies();
    Ok(HttpResponse::Ok()
        .cookie(cookies::access_cookie(
            refreshed.issued.access_token,
            secure,
            state.sessions.tokens().access_ttl(),
        ))
        .cookie(cookies::refresh_cookie(
            refreshed.issued.refresh_token,
            secure,
            state.sessions.tokens().refresh_ttl(),
        ))
        .json(serde_json::json!({
            "success": true,
            "user": PublicUser::from(&refreshed.user),
        })))
}

/// POST /auth/logout - Close the current session (PROTECTED)
#[post("/logout")]
pub async fn logout_session(auth: AuthUser, state: web::Data<AppState>) -> AppResult<HttpResponse> {
    state.sessions.revoke_session(&auth.session_id).await?;

    let mut response = HttpResponse::Ok();
    cookies::clear_auth_cookies(&mut response);
    Ok(response.json(serde_json::json!({
        "success": true,
        "message": "Logged out"
    })))
}

/// POST /auth/logout-all - Close every other session (PROTECTED)
#[post("/logout-all")]
pub async fn logout_all(auth: AuthUser, state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let revoked = state
        .sessions
        .revoke_all_user_sessions(auth.user_id, Some(&auth.session_id))
        .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "revoked": revoked
    })))
}

/// GET /auth/me - Current user (PROTECTED)
#[get("/me")]
pub async fn current_user(auth: AuthUser, state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let user = UserService::find_by_id(&state.db, auth.user_id).await?;
    Ok(HttpResponse::Ok().json(PublicUser::from(&user)))
}

/// GET /auth/sessions - Active sessions of the caller (PROTECTED)
#[get("/sessions")]
pub async fn list_sessions(auth: AuthUser, state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let sessions: Vec<SessionView> = state
        .sessions
        .get_user_sessions(auth.user_id)
        .await?
        .into_iter()
        .map(|session| SessionView {
            current: session.id == auth.session_id,
            session,
        })
        .collect();

    Ok(HttpResponse::Ok().json(sessions))
}

/// DELETE /auth/sessions/{id} - Revoke one of the caller's sessions (PROTECTED)
#[delete("/sessions/{id}")]
pub async fn revoke_session(
    auth: AuthUser,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let session_id = path.into_inner();
    let owned = state
        .sessions
        .get_user_sessions(auth.user_id)
        .await?
        .iter()
        .any(|s| s.id == session_id);
    if !owned {
        return Err(AppError::NotFound("Session not found".to_string()));
    }

    state.sessions.revoke_session(&session_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "current": session_id == auth.session_id
    })))
}

pub fn auth_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth")
            .service(issue_csrf)
            .service(request_otp)
            .service(verify_otp)
            .service(login)
            .service(refresh)
            .service(logout_session)
            .service(logout_all)
            .service(current_user)
            .service(list_sessions)
            .service(revoke_session),
    );
}
