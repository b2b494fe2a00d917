// ============================================================================
// MODEL : OTP VERIFICATIONS
// ============================================================================
//
// Columns of the otp_verifications table:
//   - id (INTEGER, PRIMARY KEY, SERIAL)
//   - email (VARCHAR, NOT NULL) - accounts may not exist yet
//   - code (VARCHAR, NOT NULL) - 6 digits
//   - purpose (TEXT, NOT NULL) - REGISTRATION | PASSWORD_RESET | EMAIL_VERIFICATION
//   - verified (BOOLEAN, NOT NULL)
//   - attempts (INTEGER, NOT NULL) - failed guesses, capped at 5
//   - expires_at (TIMESTAMP, NOT NULL)
//   - user_id (INTEGER, NULL, FK to users) - set once registration succeeds
//   - created_at (TIMESTAMP, NOT NULL)
//
// Workflow:
//   1. POST /api/auth/request-otp inserts a row and sends the code
//   2. POST /api/auth/verify-otp looks up an unverified, unexpired row
//   3. A wrong code bumps attempts on every open row of the email
//   4. At 5 attempts the row is dead even for the right code
//   5. Success flips verified = true (one use only)
//
// ============================================================================

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub const MAX_ATTEMPTS: i32 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OtpPurpose {
    #[sea_orm(string_value = "REGISTRATION")]
    Registration,
    #[sea_orm(string_value = "PASSWORD_RESET")]
    PasswordReset,
    #[sea_orm(string_value = "EMAIL_VERIFICATION")]
    EmailVerification,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "otp_verifications")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub email: String,

    #[serde(skip_serializing)]
    pub code: String,

    pub purpose: OtpPurpose,

    pub verified: bool,

    pub attempts: i32,

    pub expires_at: DateTime,

    pub user_id: Option<i32>,

    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::UserId",
        to = "super::users::Column::Id"
    )]
    User,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
