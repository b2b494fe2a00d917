use actix_web::cookie::{time, Cookie, SameSite};
use actix_web::HttpResponseBuilder;

use crate::services::session_service::{session_lifetime, ACCESS_COOKIE, REFRESH_COOKIE};
use crate::utils::csrf::CSRF_COOKIE;
use crate::utils::jwt::TokenCodec;

fn max_age(duration: chrono::Duration) -> time::Duration {
    time::Duration::seconds(duration.num_seconds().max(0))
}

fn build(name: &'static str, value: String, http_only: bool, secure: bool, ttl: chrono::Duration) -> Cookie<'static> {
    Cookie::build(name, value)
        .path("/")
        .http_only(http_only)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(max_age(ttl))
        .finish()
}

pub fn access_cookie(token: String, secure: bool, ttl: chrono::Duration) -> Cookie<'static> {
    build(ACCESS_COOKIE, token, true, secure, ttl)
}

pub fn refresh_cookie(token: String, secure: bool, ttl: chrono::Duration) -> Cookie<'static> {
    build(REFRESH_COOKIE, token, true, secure, ttl)
}

/// Readable by client script, the double-submit pattern depends on it.
pub fn csrf_cookie(token: String, secure: bool) -> Cookie<'static> {
    build(CSRF_COOKIE, token, false, secure, session_lifetime())
}

/// Sets the access, refresh and CSRF cookies in one go. Cookie lifetimes
/// follow the token lifetimes.
pub fn set_auth_cookies(
    response: &mut HttpResponseBuilder,
    access_token: String,
    refresh_token: String,
    csrf_token: String,
    secure: bool,
    tokens: &TokenCodec,
) {
    response
        .cookie(access_cookie(access_token, secure, tokens.access_ttl()))
        .cookie(refresh_cookie(refresh_token, secure, tokens.refresh_ttl()))
        .cookie(csrf_cookie(csrf_token, secure));
}

pub fn clear_auth_cookies(response: &mut HttpResponseBuilder) {
    for name in [ACCESS_COOKIE, REFRESH_COOKIE, CSRF_COOKIE] {
        let mut cookie = Cookie::build(name, "").path("/").finish();
        cookie.make_removal();
        response.cookie(cookie);
    }
}
