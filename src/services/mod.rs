pub mod otp_service;
pub mod session_info;
pub mod session_service;
pub mod user_service;
