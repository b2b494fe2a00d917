use actix_web::HttpRequest;
use actix_web::http::header;
use chrono::{Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::*;
use uuid::Uuid;

use crate::models::{sessions, users};
use crate::services::session_info::SessionInfo;
use crate::utils::jwt::{AccessPayload, RefreshPayload, TokenCodec};

pub const ACCESS_COOKIE: &str = "access-token";
pub const REFRESH_COOKIE: &str = "refresh-token";

/// Absolute session lifetime. Refreshing never extends it.
pub fn session_lifetime() -> Duration {
    Duration::days(7)
}

/// A freshly minted token pair and the row it belongs to.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub session: sessions::Model,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone)]
pub struct ValidatedSession {
    pub session: sessions::Model,
    pub user: users::Model,
    pub payload: AccessPayload,
}

#[derive(Debug, Clone)]
pub struct RefreshedSession {
    pub issued: IssuedSession,
    pub user: users::Model,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session storage failed: {0}")]
    Database(#[from] DbErr),

    #[error("token signing failed: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

/// Session store. Token problems come back as `None`, storage problems as
/// errors, so callers can tell "not logged in" from "database down".
#[derive(Clone)]
pub struct SessionService {
    db: DatabaseConnection,
    tokens: TokenCodec,
}

impl SessionService {
    pub fn new(db: DatabaseConnection, tokens: TokenCodec) -> Self {
        SessionService { db, tokens }
    }

    pub fn tokens(&self) -> &TokenCodec {
        &self.tokens
    }

    fn mint_pair(&self, user: &users::Model, session_id: &str) -> Result<(String, String), SessionError> {
        let access_token = self.tokens.generate_access_token(&AccessPayload {
            user_id: user.id,
            email: user.email.clone(),
            role: user.role,
            session_id: session_id.to_string(),
        })?;
        let refresh_token = self.tokens.generate_refresh_token(&RefreshPayload {
            user_id: user.id,
            session_id: session_id.to_string(),
        })?;
        Ok((access_token, refresh_token))
    }

    /// Opens a session for a user.
    ///
    /// The session id is generated up front so the tokens can embed it and
    /// the row is inserted once, already holding its token pair.
    pub async fn create_session(
        &self,
        user: &users::Model,
        info: SessionInfo,
    ) -> Result<IssuedSession, SessionError> {
        let session_id = Uuid::new_v4().to_string();
        let (access_token, refresh_token) = self.mint_pair(user, &session_id)?;
        let now = Utc::now().naive_utc();

        let session = sessions::ActiveModel {
            id: Set(session_id),
            user_id: Set(user.id),
            access_token: Set(access_token.clone()),
            refresh_token: Set(refresh_token.clone()),
            expires_at: Set(now + session_lifetime()),
            is_active: Set(true),
            last_activity: Set(now),
            ip_address: Set(info.ip_address),
            user_agent: Set(info.user_agent),
            device: Set(info.device),
            browser: Set(info.browser),
            browser_version: Set(info.browser_version),
            os: Set(info.os),
            os_version: Set(info.os_version),
            platform: Set(info.platform),
            country: Set(None),
            region: Set(None),
            city: Set(None),
            created_at: Set(now),
        }
        .insert(&self.db)
        .await?;

        tracing::info!(user_id = user.id, session_id = %session.id, "session created");

        Ok(IssuedSession {
            session,
            access_token,
            refresh_token,
        })
    }

    /// Resolves an access token to a live session.
    ///
    /// The row wins over the token: an inactive or expired row, an inactive
    /// user, or a token that is no longer the row's current one all reject.
    pub async fn validate_session(&self, access_token: &str) -> Result<Option<ValidatedSession>, DbErr> {
        let Some(payload) = self.tokens.verify_access_token(access_token) else {
            return Ok(None);
        };

        let Some((session, user)) = sessions::Entity::find_by_id(payload.session_id.clone())
            .find_also_related(users::Entity)
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };
        let Some(user) = user else {
            return Ok(None);
        };

        let now = Utc::now().naive_utc();
        if !session.is_active
            || session.expires_at <= now
            || session.access_token != access_token
            || session.user_id != payload.user_id
            || !user.is_active
        {
            return Ok(None);
        }

        sessions::Entity::update_many()
            .col_expr(sessions::Column::LastActivity, Expr::value(now))
            .filter(sessions::Column::Id.eq(session.id.clone()))
            .exec(&self.db)
            .await?;

        Ok(Some(ValidatedSession {
            session: sessions::Model { last_activity: now, ..session },
            user,
            payload,
        }))
    }

    /// Rotates the token pair of a session.
    ///
    /// The swap is one conditional update keyed on the presented refresh
    /// token, so of two concurrent refreshes with the same token exactly one
    /// wins and a superseded token can never be replayed.
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<Option<RefreshedSession>, SessionError> {
        let Some(payload) = self.tokens.verify_refresh_token(refresh_token) else {
            return Ok(None);
        };

        let Some((session, Some(user))) = sessions::Entity::find_by_id(payload.session_id.clone())
            .find_also_related(users::Entity)
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };

        let now = Utc::now().naive_utc();
        if !session.is_active
            || session.expires_at <= now
            || session.refresh_token != refresh_token
            || !user.is_active
        {
            return Ok(None);
        }

        self.rotate(session, user, refresh_token).await
    }

    /// Swaps in a new pair only while the row still holds `presented`.
    /// `None` means another refresh got there first.
    async fn rotate(
        &self,
        session: sessions::Model,
        user: users::Model,
        presented: &str,
    ) -> Result<Option<RefreshedSession>, SessionError> {
        let now = Utc::now().naive_utc();
        let (access_token, new_refresh_token) = self.mint_pair(&user, &session.id)?;

        let result = sessions::Entity::update_many()
            .col_expr(sessions::Column::AccessToken, Expr::value(access_token.clone()))
            .col_expr(sessions::Column::RefreshToken, Expr::value(new_refresh_token.clone()))
            .col_expr(sessions::Column::LastActivity, Expr::value(now))
            .filter(sessions::Column::Id.eq(session.id.clone()))
            .filter(sessions::Column::RefreshToken.eq(presented))
            .filter(sessions::Column::IsActive.eq(true))
            .exec(&self.db)
            .await?;

        if result.rows_affected != 1 {
            tracing::warn!(session_id = %session.id, "refresh token lost a rotation race");
            return Ok(None);
        }

        tracing::debug!(session_id = %session.id, "session refreshed");

        Ok(Some(RefreshedSession {
            issued: IssuedSession {
                session: sessions::Model {
                    access_token: access_token.clone(),
                    refresh_token: new_refresh_token.clone(),
                    last_activity: now,
                    ..session
                },
                access_token,
                refresh_token: new_refresh_token,
            },
            user,
        }))
    }

    pub async fn revoke_session(&self, session_id: &str) -> Result<u64, DbErr> {
        let result = sessions::Entity::update_many()
            .col_expr(sessions::Column::IsActive, Expr::value(false))
            .filter(sessions::Column::Id.eq(session_id))
            .filter(sessions::Column::IsActive.eq(true))
            .exec(&self.db)
            .await?;

        tracing::info!(session_id = %session_id, revoked = result.rows_affected, "session revoked");
        Ok(result.rows_affected)
    }

    /// Deactivates every session of a user, optionally sparing one
    /// ("log out everywhere but here").
    pub async fn revoke_all_user_sessions(
        &self,
        user_id: i32,
        except_session_id: Option<&str>,
    ) -> Result<u64, DbErr> {
        let mut query = sessions::Entity::update_many()
            .col_expr(sessions::Column::IsActive, Expr::value(false))
            .filter(sessions::Column::UserId.eq(user_id))
            .filter(sessions::Column::IsActive.eq(true));
        if let Some(except) = except_session_id {
            query = query.filter(sessions::Column::Id.ne(except));
        }

        let result = query.exec(&self.db).await?;
        tracing::info!(user_id, revoked = result.rows_affected, "user sessions revoked");
        Ok(result.rows_affected)
    }

    /// Active, unexpired sessions of a user, most recently used first.
    pub async fn get_user_sessions(&self, user_id: i32) -> Result<Vec<sessions::Model>, DbErr> {
        sessions::Entity::find()
            .filter(sessions::Column::UserId.eq(user_id))
            .filter(sessions::Column::IsActive.eq(true))
            .filter(sessions::Column::ExpiresAt.gt(Utc::now().naive_utc()))
            .order_by_desc(sessions::Column::LastActivity)
            .all(&self.db)
            .await
    }

    /// Storage hygiene only: expiry is already enforced at read time.
    pub async fn cleanup_expired_sessions(&self) -> Result<u64, DbErr> {
        let result = sessions::Entity::update_many()
            .col_expr(sessions::Column::IsActive, Expr::value(false))
            .filter(sessions::Column::IsActive.eq(true))
            .filter(sessions::Column::ExpiresAt.lte(Utc::now().naive_utc()))
            .exec(&self.db)
            .await?;

        if result.rows_affected > 0 {
            tracing::info!(deactivated = result.rows_affected, "expired sessions cleaned up");
        }
        Ok(result.rows_affected)
    }

    /// `Authorization: Bearer <token>` first, then the `access-token` cookie.
    pub fn access_token_from_request(req: &HttpRequest) -> Option<String> {
        req.headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .or_else(|| {
                req.cookie(ACCESS_COOKIE)
                    .map(|c| c.value().to_string())
                    .filter(|v| !v.is_empty())
            })
    }

    pub async fn get_session_from_request(&self, req: &HttpRequest) -> Result<Option<ValidatedSession>, DbErr> {
        match Self::access_token_from_request(req) {
            Some(token) => self.validate_session(&token).await,
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{insert_user, test_db, test_jwt_config};
    use crate::models::users::Role;
    use actix_web::cookie::Cookie;
    use actix_web::test::TestRequest;

    async fn service() -> SessionService {
        let db = test_db().await;
        SessionService::new(db, TokenCodec::new(&test_jwt_config()))
    }

    fn chrome_info() -> SessionInfo {
        SessionInfo {
            ip_address: Some("203.0.113.7".to_string()),
            device: Some("desktop".to_string()),
            browser: Some("Chrome".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_validate_session() {
        let store = service().await;
        let user = insert_user(&store.db, "agent@travel.test", Role::Editor).await;

        let issued = store.create_session(&user, chrome_info()).await.unwrap();
        assert!(issued.session.is_active);
        assert_eq!(issued.session.access_token, issued.access_token);
        assert_eq!(issued.session.browser.as_deref(), Some("Chrome"));

        let validated = store
            .validate_session(&issued.access_token)
            .await
            .unwrap()
            .expect("session should validate");
        assert_eq!(validated.user.id, user.id);
        assert_eq!(validated.payload.session_id, issued.session.id);
        assert_eq!(validated.payload.role, Role::Editor);
    }

    #[tokio::test]
    async fn test_revoked_session_rejects_valid_token() {
        let store = service().await;
        let user = insert_user(&store.db, "a@b.com", Role::User).await;
        let issued = store.create_session(&user, SessionInfo::default()).await.unwrap();

        assert_eq!(store.revoke_session(&issued.session.id).await.unwrap(), 1);
        assert!(store.tokens.verify_access_token(&issued.access_token).is_some());
        assert!(store.validate_session(&issued.access_token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_row_rejects_valid_token() {
        let store = service().await;
        let user = insert_user(&store.db, "a@b.com", Role::User).await;
        let issued = store.create_session(&user, SessionInfo::default()).await.unwrap();

        let mut row: sessions::ActiveModel = issued.session.clone().into();
        row.expires_at = Set(Utc::now().naive_utc() - Duration::minutes(1));
        row.update(&store.db).await.unwrap();

        assert!(store.validate_session(&issued.access_token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_inactive_user_rejected() {
        let store = service().await;
        let user = insert_user(&store.db, "a@b.com", Role::User).await;
        let issued = store.create_session(&user, SessionInfo::default()).await.unwrap();

        let mut row: users::ActiveModel = user.into();
        row.is_active = Set(false);
        row.update(&store.db).await.unwrap();

        assert!(store.validate_session(&issued.access_token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_rejects_replay() {
        let store = service().await;
        let user = insert_user(&store.db, "a@b.com", Role::User).await;
        let issued = store.create_session(&user, SessionInfo::default()).await.unwrap();

        let refreshed = store
            .refresh_session(&issued.refresh_token)
            .await
            .unwrap()
            .expect("first refresh should succeed");
        assert_ne!(refreshed.issued.refresh_token, issued.refresh_token);
        assert_eq!(refreshed.issued.session.id, issued.session.id);

        // Replaying the superseded token fails
        assert!(store.refresh_session(&issued.refresh_token).await.unwrap().is_none());

        // The old access token died with the rotation, the new one works
        assert!(store.validate_session(&issued.access_token).await.unwrap().is_none());
        assert!(store
            .validate_session(&refreshed.issued.access_token)
            .await
            .unwrap()
            .is_some());

        // And the new refresh token keeps working
        assert!(store
            .refresh_session(&refreshed.issued.refresh_token)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_refresh_of_revoked_session_fails() {
        let store = service().await;
        let user = insert_user(&store.db, "a@b.com", Role::User).await;
        let issued = store.create_session(&user, SessionInfo::default()).await.unwrap();

        store.revoke_session(&issued.session.id).await.unwrap();
        assert!(store.refresh_session(&issued.refresh_token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_access_token_is_not_a_refresh_token() {
        let store = service().await;
        let user = insert_user(&store.db, "a@b.com", Role::User).await;
        let issued = store.create_session(&user, SessionInfo::default()).await.unwrap();

        assert!(store.refresh_session(&issued.access_token).await.unwrap().is_none());
        assert!(store.validate_session(&issued.refresh_token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_all_except_current() {
        let store = service().await;
        let user = insert_user(&store.db, "a@b.com", Role::User).await;
        let other = insert_user(&store.db, "c@d.com", Role::User).await;

        let laptop = store.create_session(&user, SessionInfo::default()).await.unwrap();
        let phone = store.create_session(&user, SessionInfo::default()).await.unwrap();
        let tablet = store.create_session(&user, SessionInfo::default()).await.unwrap();
        let foreign = store.create_session(&other, SessionInfo::default()).await.unwrap();

        let revoked = store
            .revoke_all_user_sessions(user.id, Some(&laptop.session.id))
            .await
            .unwrap();
        assert_eq!(revoked, 2);

        assert!(store.validate_session(&laptop.access_token).await.unwrap().is_some());
        assert!(store.validate_session(&phone.access_token).await.unwrap().is_none());
        assert!(store.validate_session(&tablet.access_token).await.unwrap().is_none());
        assert!(store.validate_session(&foreign.access_token).await.unwrap().is_some());

        assert_eq!(store.revoke_all_user_sessions(user.id, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_user_sessions_most_recent_first() {
        let store = service().await;
        let user = insert_user(&store.db, "a@b.com", Role::User).await;

        let older = store.create_session(&user, SessionInfo::default()).await.unwrap();
        let newer = store.create_session(&user, SessionInfo::default()).await.unwrap();
        let revoked = store.create_session(&user, SessionInfo::default()).await.unwrap();
        store.revoke_session(&revoked.session.id).await.unwrap();

        let mut row: sessions::ActiveModel = older.session.clone().into();
        row.last_activity = Set(Utc::now().naive_utc() - Duration::hours(2));
        row.update(&store.db).await.unwrap();

        let listed = store.get_user_sessions(user.id).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec![newer.session.id.as_str(), older.session.id.as_str()]);
    }

    #[tokio::test]
    async fn test_cleanup_only_touches_expired_rows() {
        let store = service().await;
        let user = insert_user(&store.db, "a@b.com", Role::User).await;
        let live = store.create_session(&user, SessionInfo::default()).await.unwrap();
        let stale = store.create_session(&user, SessionInfo::default()).await.unwrap();

        let mut row: sessions::ActiveModel = stale.session.clone().into();
        row.expires_at = Set(Utc::now().naive_utc() - Duration::days(1));
        row.update(&store.db).await.unwrap();

        assert_eq!(store.cleanup_expired_sessions().await.unwrap(), 1);
        assert_eq!(store.cleanup_expired_sessions().await.unwrap(), 0);

        let live_row = sessions::Entity::find_by_id(live.session.id.clone())
            .one(&store.db)
            .await
            .unwrap()
            .unwrap();
        assert!(live_row.is_active);
    }

    #[tokio::test]
    async fn test_session_from_request_prefers_bearer() {
        let store = service().await;
        let user = insert_user(&store.db, "a@b.com", Role::User).await;
        let issued = store.create_session(&user, SessionInfo::default()).await.unwrap();

        let bearer = TestRequest::get()
            .insert_header(("Authorization", format!("Bearer {}", issued.access_token)))
            .cookie(Cookie::new(ACCESS_COOKIE, "garbage"))
            .to_http_request();
        assert!(store.get_session_from_request(&bearer).await.unwrap().is_some());

        let cookie = TestRequest::get()
            .cookie(Cookie::new(ACCESS_COOKIE, issued.access_token.clone()))
            .to_http_request();
        assert!(store.get_session_from_request(&cookie).await.unwrap().is_some());

        let anonymous = TestRequest::get().to_http_request();
        assert!(store.get_session_from_request(&anonymous).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rotation_loses_to_an_earlier_rotation() {
        let store = service().await;
        let user = insert_user(&store.db, "a@b.com", Role::User).await;
        let issued = store.create_session(&user, SessionInfo::default()).await.unwrap();

        // Both callers read the row while it still held the original token
        let seen = issued.session.clone();
        let first = store
            .rotate(seen.clone(), user.clone(), &issued.refresh_token)
            .await
            .unwrap();
        let second = store
            .rotate(seen, user, &issued.refresh_token)
            .await
            .unwrap();

        let winner = first.expect("first rotation should win");
        assert!(second.is_none());
        assert!(store
            .validate_session(&winner.issued.access_token)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_concurrent_refresh_has_one_winner() {
        let path = std::env::temp_dir().join(format!("travel-cms-{}.db", Uuid::new_v4()));
        let mut options = ConnectOptions::new(format!("sqlite://{}?mode=rwc", path.display()));
        options.max_connections(4).sqlx_logging(false);
        let db = Database::connect(options).await.unwrap();
        crate::db::sync_schema(&db).await.unwrap();

        let store = SessionService::new(db, TokenCodec::new(&test_jwt_config()));
        let user = insert_user(&store.db, "a@b.com", Role::User).await;
        let issued = store.create_session(&user, SessionInfo::default()).await.unwrap();

        let (a, b) = tokio::join!(
            store.refresh_session(&issued.refresh_token),
            store.refresh_session(&issued.refresh_token),
        );
        let winners = [a.unwrap(), b.unwrap()].iter().filter(|r| r.is_some()).count();
        assert_eq!(winners, 1);

        store.db.clone().close().await.ok();
        let _ = std::fs::remove_file(&path);
    }
}
