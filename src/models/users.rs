// ============================================================================
// MODEL : USERS
// ============================================================================
//
// Columns of the users table:
//   - id (INTEGER, PRIMARY KEY, SERIAL)
//   - email (VARCHAR, UNIQUE, NOT NULL)
//   - password_hash (VARCHAR, NOT NULL) - pbkdf2:sha256:iterations$salt$hash
//   - name (VARCHAR, NOT NULL)
//   - role (TEXT, NOT NULL) - USER | EDITOR | ADMIN
//   - is_active (BOOLEAN, NOT NULL)
//   - last_login_at (TIMESTAMP, NULL)
//   - created_by / updated_by (INTEGER, NULL) - id of the acting user
//   - created_at / updated_at (TIMESTAMP, NOT NULL)
//
// Notes:
//   - Users are never deleted: deactivation sets is_active = false and
//     deactivates every session of the user
//   - The role order is USER < EDITOR < ADMIN
//
// ============================================================================

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    #[sea_orm(string_value = "USER")]
    User,
    #[sea_orm(string_value = "EDITOR")]
    Editor,
    #[sea_orm(string_value = "ADMIN")]
    Admin,
}

impl Role {
    /// Lowest tier, given to self-registered accounts.
    pub const DEFAULT: Role = Role::User;

    /// True when this role is at least as privileged as `required`.
    pub fn at_least(self, required: Role) -> bool {
        self >= required
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique)]
    pub email: String,

    #[serde(skip_serializing)]
    pub password_hash: String,

    pub name: String,

    pub role: Role,

    pub is_active: bool,

    pub last_login_at: Option<DateTime>,

    pub created_by: Option<i32>,

    pub updated_by: Option<i32>,

    pub created_at: DateTime,

    pub updated_at: DateTime,
}

/// Fields of a user that may leave the server.
#[derive(Debug, Clone, Serialize)]
pub struct PublicUser {
    pub id: i32,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub is_active: bool,
    pub last_login_at: Option<DateTime>,
    pub created_at: DateTime,
}

impl From<&Model> for PublicUser {
    fn from(user: &Model) -> Self {
        PublicUser {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role,
            is_active: user.is_active,
            last_login_at: user.last_login_at,
            created_at: user.created_at,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::sessions::Entity")]
    Sessions,

    #[sea_orm(has_many = "super::otp_verifications::Entity")]
    OtpVerifications,
}

impl Related<super::sessions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sessions.def()
    }
}

impl Related<super::otp_verifications::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OtpVerifications.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
