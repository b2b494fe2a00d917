use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::config::AppConfig;
use crate::services::otp_service::{OtpSender, OtpService};
use crate::services::session_info::{ClientClassifier, UserAgentClassifier};
use crate::services::session_service::SessionService;
use crate::utils::csrf::CsrfService;
use crate::utils::jwt::TokenCodec;

/// Everything a handler needs, built once at startup from the configuration.
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: AppConfig,
    pub sessions: SessionService,
    pub csrf: CsrfService,
    pub otp: OtpService,
    pub classifier: Arc<dyn ClientClassifier>,
}

impl AppState {
    pub fn new(
        db: DatabaseConnection,
        config: AppConfig,
        otp_sender: Arc<dyn OtpSender>,
    ) -> Result<Self, regex::Error> {
        let sessions = SessionService::new(db.clone(), TokenCodec::new(&config.jwt));
        let csrf = CsrfService::new(&config.csrf_secret);
        let otp = OtpService::new(
            db.clone(),
            sessions.clone(),
            csrf.clone(),
            otp_sender,
            config.otp_ttl,
        );

        Ok(AppState {
            db,
            config,
            sessions,
            csrf,
            otp,
            classifier: Arc::new(UserAgentClassifier::new()?),
        })
    }

    pub fn secure_cookies(&self) -> bool {
        self.config.is_production()
    }
}
