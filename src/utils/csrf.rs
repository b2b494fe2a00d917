//! Stateless double-submit CSRF tokens.
//!
//! A token is `<nonce>.<mac>` where `mac = HMAC-SHA256(secret, nonce)`. The
//! client keeps it in the readable `csrf-token` cookie and echoes it in the
//! `X-CSRF-Token` header on mutating requests; the server only has to check
//! the MAC, no storage involved.

use actix_web::HttpRequest;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const CSRF_HEADER: &str = "x-csrf-token";
pub const XSRF_HEADER: &str = "x-xsrf-token";
pub const CSRF_COOKIE: &str = "csrf-token";

const NONCE_LENGTH: usize = 18;

#[derive(Clone)]
pub struct CsrfService {
    secret: Vec<u8>,
}

impl CsrfService {
    pub fn new(secret: &str) -> Self {
        CsrfService {
            secret: secret.as_bytes().to_vec(),
        }
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length
        HmacSha256::new_from_slice(&self.secret).unwrap_or_else(|_| unreachable!())
    }

    pub fn generate_token(&self) -> String {
        let mut nonce = [0u8; NONCE_LENGTH];
        rand::thread_rng().fill(&mut nonce);

        let mut mac = self.mac();
        mac.update(&nonce);
        let signature = mac.finalize().into_bytes();

        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(nonce),
            URL_SAFE_NO_PAD.encode(signature)
        )
    }

    pub fn verify_token(&self, token: &str) -> bool {
        let Some((nonce, signature)) = token.split_once('.') else {
            return false;
        };
        let (Ok(nonce), Ok(signature)) = (
            URL_SAFE_NO_PAD.decode(nonce),
            URL_SAFE_NO_PAD.decode(signature),
        ) else {
            return false;
        };
        if nonce.len() != NONCE_LENGTH {
            return false;
        }

        let mut mac = self.mac();
        mac.update(&nonce);
        mac.verify_slice(&signature).is_ok()
    }

    /// Finds the submitted token: `X-CSRF-Token`, then `X-XSRF-Token`, then
    /// the `csrf-token` cookie. First non-empty value wins.
    pub fn token_from_request(req: &HttpRequest) -> Option<String> {
        [CSRF_HEADER, XSRF_HEADER]
            .iter()
            .find_map(|name| {
                req.headers()
                    .get(*name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
            })
            .or_else(|| {
                req.cookie(CSRF_COOKIE)
                    .map(|c| c.value().to_string())
                    .filter(|v| !v.is_empty())
            })
    }

    pub fn validate_request(&self, req: &HttpRequest) -> bool {
        match Self::token_from_request(req) {
            Some(token) => self.verify_token(&token),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::cookie::Cookie;
    use actix_web::test::TestRequest;

    #[test]
    fn test_fresh_token_verifies() {
        let csrf = CsrfService::new("csrf-secret");
        let token = csrf.generate_token();
        assert!(csrf.verify_token(&token));
    }

    #[test]
    fn test_altered_token_fails() {
        let csrf = CsrfService::new("csrf-secret");
        let token = csrf.generate_token();

        for index in [0, token.len() / 2, token.len() - 1] {
            let mut chars: Vec<char> = token.chars().collect();
            if chars[index] == '.' {
                continue;
            }
            chars[index] = if chars[index] == 'A' { 'B' } else { 'A' };
            let altered: String = chars.into_iter().collect();
            assert!(!csrf.verify_token(&altered), "altered at {index}");
        }
    }

    #[test]
    fn test_other_secret_fails() {
        let token = CsrfService::new("secret-one").generate_token();
        assert!(!CsrfService::new("secret-two").verify_token(&token));
    }

    #[test]
    fn test_garbage_never_panics() {
        let csrf = CsrfService::new("csrf-secret");
        for junk in ["", ".", "abc", "a.b", "%%%.%%%", "..."] {
            assert!(!csrf.verify_token(junk));
        }
    }

    #[test]
    fn test_missing_token_is_invalid() {
        let csrf = CsrfService::new("csrf-secret");
        let req = TestRequest::post().to_http_request();
        assert_eq!(CsrfService::token_from_request(&req), None);
        assert!(!csrf.validate_request(&req));
    }

    #[test]
    fn test_echoed_token_is_valid() {
        let csrf = CsrfService::new("csrf-secret");
        let token = csrf.generate_token();

        let from_header = TestRequest::post()
            .insert_header(("X-CSRF-Token", token.as_str()))
            .to_http_request();
        assert!(csrf.validate_request(&from_header));

        let from_xsrf = TestRequest::post()
            .insert_header(("X-XSRF-Token", token.as_str()))
            .to_http_request();
        assert!(csrf.validate_request(&from_xsrf));

        let from_cookie = TestRequest::post()
            .cookie(Cookie::new(CSRF_COOKIE, token.clone()))
            .to_http_request();
        assert!(csrf.validate_request(&from_cookie));
    }

    #[test]
    fn test_header_precedence() {
        let req = TestRequest::post()
            .insert_header(("X-XSRF-Token", "second"))
            .insert_header(("X-CSRF-Token", "first"))
            .cookie(Cookie::new(CSRF_COOKIE, "third"))
            .to_http_request();
        assert_eq!(CsrfService::token_from_request(&req).as_deref(), Some("first"));

        let req = TestRequest::post()
            .insert_header(("X-XSRF-Token", "second"))
            .cookie(Cookie::new(CSRF_COOKIE, "third"))
            .to_http_request();
        assert_eq!(CsrfService::token_from_request(&req).as_deref(), Some("second"));
    }
}
