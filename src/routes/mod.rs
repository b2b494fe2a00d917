pub mod admin;
pub mod auth;
pub mod health;

use actix_web::http::StatusCode;
use actix_web::middleware::ErrorHandlers;
use actix_web::{error, web};

use crate::error::{expose_error_details, AppError};

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    // Malformed JSON bodies get the same error envelope as everything else
    let json = web::JsonConfig::default()
        .error_handler(|err, _req| error::Error::from(AppError::BadRequest(err.to_string())));

    cfg.service(
        web::scope("/api")
            .app_data(json)
            .wrap(ErrorHandlers::new().handler(StatusCode::INTERNAL_SERVER_ERROR, expose_error_details))
            .service(health::health_check)
            .configure(auth::auth_routes)
            .configure(admin::admin_routes),
    );
}
