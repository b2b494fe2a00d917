// Shared fixtures for unit tests: an in-memory SQLite database with the
// auth schema, fixed secrets and a ready AppState.

use std::sync::Arc;

use chrono::{Duration, Utc};
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};

use crate::config::{AppConfig, Environment, JwtConfig};
use crate::db;
use crate::models::users::{self, Role};
use crate::services::otp_service::LogOtpSender;
use crate::state::AppState;

pub const TEST_PASSWORD: &str = "password123";

pub fn test_jwt_config() -> JwtConfig {
    JwtConfig {
        access_secret: "test-access-secret".to_string(),
        refresh_secret: "test-refresh-secret".to_string(),
        access_ttl: Duration::minutes(15),
        refresh_ttl: Duration::days(7),
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        jwt: test_jwt_config(),
        csrf_secret: "test-csrf-secret".to_string(),
        otp_ttl: Duration::minutes(10),
        cleanup_interval: Duration::hours(1),
        environment: Environment::Development,
    }
}

/// A single pooled connection, otherwise every connection would open its
/// own empty in-memory database.
pub async fn test_db() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await.unwrap();
    db::sync_schema(&db).await.unwrap();
    db
}

pub async fn test_state() -> AppState {
    let db = test_db().await;
    AppState::new(db, test_config(), Arc::new(LogOtpSender::new(true))).unwrap()
}

/// Inserts an active user whose password is [`TEST_PASSWORD`]. The stored
/// hash uses few iterations to keep tests fast.
pub async fn insert_user(db: &DatabaseConnection, email: &str, role: Role) -> users::Model {
    let now = Utc::now().naive_utc();
    users::ActiveModel {
        email: Set(email.to_string()),
        password_hash: Set(cheap_hash(TEST_PASSWORD)),
        name: Set(email.split('@').next().unwrap_or(email).to_string()),
        role: Set(role),
        is_active: Set(true),
        last_login_at: Set(None),
        created_by: Set(None),
        updated_by: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

fn cheap_hash(password: &str) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use hmac::Hmac;
    use sha2::Sha256;

    let salt = b"fixture-salt";
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2::<Hmac<Sha256>>(password.as_bytes(), salt, 1000, &mut key).unwrap();
    format!(
        "pbkdf2:sha256:1000${}${}",
        URL_SAFE_NO_PAD.encode(salt),
        URL_SAFE_NO_PAD.encode(key)
    )
}
