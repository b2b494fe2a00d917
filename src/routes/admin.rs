use actix_web::{get, patch, post, web, HttpResponse};
use serde::Deserialize;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::middleware::AdminUser;
use crate::models::users::{PublicUser, Role};
use crate::services::user_service::{NewUser, UserService};
use crate::state::AppState;

// DTO for an admin-created account
#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 1, max = 120, message = "Name must be between 1 and 120 characters"))]
    pub name: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    #[serde(default = "default_role")]
    pub role: Role,
}

fn default_role() -> Role {
    Role::DEFAULT
}

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub role: Role,
}

/// GET /admin/users - List every account (ADMIN)
#[get("")]
pub async fn list_users(_admin: AdminUser, state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let users: Vec<PublicUser> = UserService::list(&state.db)
        .await?
        .iter()
        .map(PublicUser::from)
        .collect();
    Ok(HttpResponse::Ok().json(users))
}

/// POST /admin/users - Create an account with a role (ADMIN)
#[post("")]
pub async fn create_user(
    admin: AdminUser,
    body: web::Json<CreateUserRequest>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    body.validate()?;

    let body = body.into_inner();
    let user = UserService::create_user(
        &state.db,
        NewUser {
            email: body.email,
            name: body.name,
            password: body.password,
            role: body.role,
            created_by: Some(admin.0.user_id),
        },
    )
    .await?;

    Ok(HttpResponse::Created().json(PublicUser::from(&user)))
}

/// PATCH /admin/users/{id}/role - Change a role (ADMIN)
#[patch("/{id}/role")]
pub async fn change_role(
    admin: AdminUser,
    path: web::Path<i32>,
    body: web::Json<ChangeRoleRequest>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let user_id = path.into_inner();
    if user_id == admin.0.user_id && body.role != Role::Admin {
        return Err(AppError::BadRequest("Admins cannot demote themselves".to_string()));
    }

    let user = UserService::change_role(&state.db, user_id, body.role, admin.0.user_id).await?;
    Ok(HttpResponse::Ok().json(PublicUser::from(&user)))
}

/// POST /admin/users/{id}/deactivate - Soft delete and log out everywhere (ADMIN)
#[post("/{id}/deactivate")]
pub async fn deactivate_user(
    admin: AdminUser,
    path: web::Path<i32>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let user_id = path.into_inner();
    if user_id == admin.0.user_id {
        return Err(AppError::BadRequest("Admins cannot deactivate themselves".to_string()));
    }

    let user = UserService::deactivate(&state.db, &state.sessions, user_id, admin.0.user_id).await?;
    Ok(HttpResponse::Ok().json(PublicUser::from(&user)))
}

pub fn admin_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/admin/users")
            .service(list_users)
            .service(create_user)
            .service(change_role)
            .service(deactivate_user),
    );
}
