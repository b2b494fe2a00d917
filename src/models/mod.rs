// ============================================================================
// MODELS
// ============================================================================
//
// One sea-orm entity per table:
//   - users : dashboard accounts (USER / EDITOR / ADMIN)
//   - sessions : one row per login, source of truth for revocation
//   - otp_verifications : one-time codes for registration and password reset
//
// health.rs is not a table, only the body of GET /api/health
//
// ============================================================================

pub mod users;
pub mod sessions;
pub mod otp_verifications;
pub mod health;
