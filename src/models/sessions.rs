// ============================================================================
// MODEL : SESSIONS
// ============================================================================
//
// One row per login. The row is the only authority on revocation: a valid
// JWT whose row is inactive, expired, or holds a different token is rejected.
//
// Columns of the sessions table:
//   - id (VARCHAR, PRIMARY KEY) - UUID v4 generated before insert
//   - user_id (INTEGER, NOT NULL, FK to users)
//   - access_token / refresh_token (TEXT, NOT NULL) - current pair only,
//     overwritten on every refresh
//   - expires_at (TIMESTAMP, NOT NULL) - created_at + 7 days, never extended
//   - is_active (BOOLEAN, NOT NULL) - false once revoked
//   - last_activity (TIMESTAMP, NOT NULL) - touched on every validated request
//   - ip_address, user_agent, device, browser, browser_version, os,
//     os_version, platform (VARCHAR, NULL) - audit metadata only
//   - country, region, city (VARCHAR, NULL) - never filled in today
//   - created_at (TIMESTAMP, NOT NULL)
//
// ============================================================================

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub user_id: i32,

    #[serde(skip_serializing)]
    #[sea_orm(column_type = "Text")]
    pub access_token: String,

    #[serde(skip_serializing)]
    #[sea_orm(column_type = "Text")]
    pub refresh_token: String,

    pub expires_at: DateTime,

    pub is_active: bool,

    pub last_activity: DateTime,

    pub ip_address: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub user_agent: Option<String>,
    pub device: Option<String>,
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub platform: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,

    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::UserId",
        to = "super::users::Column::Id",
        on_delete = "Cascade"
    )]
    User,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
