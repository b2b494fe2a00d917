use actix_web::{get, web, HttpResponse};
use chrono::Utc;

use crate::models::health::HealthResponse;
use crate::state::AppState;

/// GET /health - Liveness plus a database ping (PUBLIC)
#[get("/health")]
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let database = match state.db.ping().await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::warn!(error = %e, "database ping failed");
            "unavailable"
        }
    };

    let response = HealthResponse {
        status: "ok".to_string(),
        database: database.to_string(),
        time: Utc::now(),
    };

    HttpResponse::Ok().json(response)
}
