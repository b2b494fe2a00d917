mod config;
mod db;
mod error;
mod middleware;
mod models;
mod routes;
mod services;
mod state;
mod utils;

#[cfg(test)]
mod test_support;

use std::io;
use std::sync::Arc;

use actix_web::{rt, web, App, HttpServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::AppConfig;
use crate::services::otp_service::LogOtpSender;
use crate::services::session_service::SessionService;
use crate::state::AppState;

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("travel_cms=info,actix_web=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Deactivates expired sessions on a fixed interval. Expiry is already
/// enforced on every read, this only keeps the table tidy.
fn spawn_session_cleanup(sessions: SessionService, every: chrono::Duration) {
    let period = every
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(3600));

    rt::spawn(async move {
        let mut ticker = rt::time::interval(period);
        loop {
            ticker.tick().await;
            if let Err(e) = sessions.cleanup_expired_sessions().await {
                tracing::error!(error = %e, "session cleanup failed");
            }
        }
    });
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env().map_err(|e| {
        tracing::error!(error = %e, "invalid configuration");
        io::Error::new(io::ErrorKind::InvalidInput, e)
    })?;

    tracing::info!("connecting to database");
    let db = db::establish_connection(&config.database_url)
        .await
        .map_err(io::Error::other)?;
    db::sync_schema(&db).await.map_err(io::Error::other)?;
    tracing::info!("database ready");

    let otp_sender = Arc::new(LogOtpSender::new(!config.is_production()));
    let state = AppState::new(db, config, otp_sender).map_err(io::Error::other)?;
    spawn_session_cleanup(state.sessions.clone(), state.config.cleanup_interval);

    let bind = (state.config.host.clone(), state.config.port);
    tracing::info!(host = %bind.0, port = bind.1, "starting server");

    let data = web::Data::new(state);
    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .wrap(actix_web::middleware::Logger::default())
            .configure(routes::configure_routes)
    })
    .bind(bind)?
    .run()
    .await
}
