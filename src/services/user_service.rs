use chrono::Utc;
use sea_orm::*;

use crate::error::{AppError, AppResult};
use crate::models::users::{self, Role};
use crate::services::session_service::SessionService;
use crate::utils::password;

pub struct UserService;

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password: String,
    pub role: Role,
    pub created_by: Option<i32>,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// PBKDF2 is CPU bound, keep it off the async workers.
pub async fn hash_password(plain: &str) -> AppResult<String> {
    let plain = plain.to_string();
    tokio::task::spawn_blocking(move || password::hash_password(&plain))
        .await
        .map_err(|e| AppError::Internal(format!("password hashing task failed: {}", e)))?
        .map_err(AppError::from)
}

pub async fn verify_password(plain: &str, hash: &str) -> AppResult<bool> {
    let (plain, hash) = (plain.to_string(), hash.to_string());
    tokio::task::spawn_blocking(move || password::verify_password(&plain, &hash))
        .await
        .map_err(|e| AppError::Internal(format!("password verification task failed: {}", e)))?
        .map_err(AppError::from)
}

impl UserService {
    pub async fn find_by_email(
        db: &DatabaseConnection,
        email: &str,
    ) -> Result<Option<users::Model>, DbErr> {
        users::Entity::find()
            .filter(users::Column::Email.eq(normalize_email(email)))
            .one(db)
            .await
    }

    pub async fn find_by_id(db: &DatabaseConnection, user_id: i32) -> AppResult<users::Model> {
        users::Entity::find_by_id(user_id)
            .one(db)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    pub async fn list(db: &DatabaseConnection) -> Result<Vec<users::Model>, DbErr> {
        users::Entity::find()
            .order_by_asc(users::Column::Id)
            .all(db)
            .await
    }

    /// Creates an active user. A duplicate email is a conflict, whether it is
    /// caught by the lookup or by the unique index.
    pub async fn create_user(db: &DatabaseConnection, new_user: NewUser) -> AppResult<users::Model> {
        let email = normalize_email(&new_user.email);
        if Self::find_by_email(db, &email).await?.is_some() {
            return Err(AppError::Conflict("User with this email already exists".to_string()));
        }

        let password_hash = hash_password(&new_user.password).await?;
        let now = Utc::now().naive_utc();

        let inserted = users::ActiveModel {
            email: Set(email),
            password_hash: Set(password_hash),
            name: Set(new_user.name.trim().to_string()),
            role: Set(new_user.role),
            is_active: Set(true),
            last_login_at: Set(None),
            created_by: Set(new_user.created_by),
            updated_by: Set(new_user.created_by),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await;

        match inserted {
            Ok(user) => {
                tracing::info!(user_id = user.id, role = ?user.role, "user created");
                Ok(user)
            }
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Err(AppError::Conflict("User with this email already exists".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Email + password check for login. Unknown email, wrong password and
    /// inactive account are indistinguishable to the caller.
    pub async fn authenticate(
        db: &DatabaseConnection,
        email: &str,
        plain_password: &str,
    ) -> AppResult<Option<users::Model>> {
        let Some(user) = Self::find_by_email(db, email).await? else {
            return Ok(None);
        };
        if !user.is_active || !verify_password(plain_password, &user.password_hash).await? {
            return Ok(None);
        }

        let mut active: users::ActiveModel = user.into();
        active.last_login_at = Set(Some(Utc::now().naive_utc()));
        Ok(Some(active.update(db).await?))
    }

    pub async fn set_password(
        db: &DatabaseConnection,
        user: users::Model,
        plain_password: &str,
    ) -> AppResult<users::Model> {
        let password_hash = hash_password(plain_password).await?;
        let mut active: users::ActiveModel = user.into();
        active.password_hash = Set(password_hash);
        active.updated_at = Set(Utc::now().naive_utc());
        Ok(active.update(db).await?)
    }

    pub async fn change_role(
        db: &DatabaseConnection,
        user_id: i32,
        role: Role,
        acting_user_id: i32,
    ) -> AppResult<users::Model> {
        let user = Self::find_by_id(db, user_id).await?;
        let mut active: users::ActiveModel = user.into();
        active.role = Set(role);
        active.updated_by = Set(Some(acting_user_id));
        active.updated_at = Set(Utc::now().naive_utc());

        let user = active.update(db).await?;
        tracing::info!(user_id, role = ?role, by = acting_user_id, "role changed");
        Ok(user)
    }

    /// Soft delete: the account stays, every session dies.
    pub async fn deactivate(
        db: &DatabaseConnection,
        sessions: &SessionService,
        user_id: i32,
        acting_user_id: i32,
    ) -> AppResult<users::Model> {
        let user = Self::find_by_id(db, user_id).await?;
        let mut active: users::ActiveModel = user.into();
        active.is_active = Set(false);
        active.updated_by = Set(Some(acting_user_id));
        active.updated_at = Set(Utc::now().naive_utc());
        let user = active.update(db).await?;

        sessions.revoke_all_user_sessions(user_id, None).await?;
        tracing::info!(user_id, by = acting_user_id, "user deactivated");
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::session_info::SessionInfo;
    use crate::test_support::{insert_user, test_state, TEST_PASSWORD};

    #[tokio::test]
    async fn test_create_user_rejects_duplicates() {
        let state = test_state().await;
        insert_user(&state.db, "guide@travel.test", Role::User).await;

        let result = UserService::create_user(
            &state.db,
            NewUser {
                email: "  Guide@Travel.test ".to_string(),
                name: "Guide".to_string(),
                password: "password123".to_string(),
                role: Role::Editor,
                created_by: None,
            },
        )
        .await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_authenticate() {
        let state = test_state().await;
        insert_user(&state.db, "guide@travel.test", Role::User).await;

        let user = UserService::authenticate(&state.db, "GUIDE@travel.test", TEST_PASSWORD)
            .await
            .unwrap()
            .expect("credentials should match");
        assert!(user.last_login_at.is_some());

        assert!(UserService::authenticate(&state.db, "guide@travel.test", "wrong-password")
            .await
            .unwrap()
            .is_none());
        assert!(UserService::authenticate(&state.db, "nobody@travel.test", TEST_PASSWORD)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_deactivate_kills_sessions() {
        let state = test_state().await;
        let admin = insert_user(&state.db, "admin@travel.test", Role::Admin).await;
        let user = insert_user(&state.db, "guide@travel.test", Role::User).await;
        let issued = state
            .sessions
            .create_session(&user, SessionInfo::default())
            .await
            .unwrap();

        let user = UserService::deactivate(&state.db, &state.sessions, user.id, admin.id)
            .await
            .unwrap();
        assert!(!user.is_active);
        assert_eq!(user.updated_by, Some(admin.id));
        assert!(state
            .sessions
            .validate_session(&issued.access_token)
            .await
            .unwrap()
            .is_none());
        assert!(UserService::authenticate(&state.db, "guide@travel.test", TEST_PASSWORD)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_change_role_unknown_user() {
        let state = test_state().await;
        let result = UserService::change_role(&state.db, 999, Role::Admin, 1).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
