use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::Hmac;
use pbkdf2::pbkdf2;
use rand::Rng;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const ITERATIONS: u32 = 260000;
const KEY_LENGTH: usize = 32;
const SALT_LENGTH: usize = 16;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("invalid password hash format: {0}")]
    Format(&'static str),

    #[error("password hashing failed")]
    Hashing,
}

/// Hashes a password in Werkzeug's format: `pbkdf2:sha256:<iterations>$<salt>$<hash>`.
/// PBKDF2-HMAC-SHA256, 260000 iterations, 16 byte random salt.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill(&mut salt);

    let mut key = [0u8; KEY_LENGTH];
    pbkdf2::<HmacSha256>(password.as_bytes(), &salt, ITERATIONS, &mut key)
        .map_err(|_| PasswordError::Hashing)?;

    Ok(format!(
        "pbkdf2:sha256:{}${}${}",
        ITERATIONS,
        URL_SAFE_NO_PAD.encode(salt),
        URL_SAFE_NO_PAD.encode(key)
    ))
}

/// Checks a password against a hash produced by [`hash_password`]. The
/// iteration count is read from the hash, so raising it later keeps old
/// hashes valid.
pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool, PasswordError> {
    let mut parts = stored_hash.split('$');
    let (Some(header), Some(salt_str), Some(hash_str), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(PasswordError::Format("expected header$salt$hash"));
    };

    let iterations = match header.split(':').collect::<Vec<_>>().as_slice() {
        ["pbkdf2", "sha256", iterations] => iterations
            .parse::<u32>()
            .map_err(|_| PasswordError::Format("iterations"))?,
        _ => return Err(PasswordError::Format("header")),
    };

    let salt = URL_SAFE_NO_PAD
        .decode(salt_str)
        .map_err(|_| PasswordError::Format("salt"))?;
    let expected = URL_SAFE_NO_PAD
        .decode(hash_str)
        .map_err(|_| PasswordError::Format("hash"))?;
    if expected.is_empty() {
        return Err(PasswordError::Format("hash"));
    }

    let mut computed = vec![0u8; expected.len()];
    pbkdf2::<HmacSha256>(password.as_bytes(), &salt, iterations, &mut computed)
        .map_err(|_| PasswordError::Hashing)?;

    Ok(constant_time_eq(&computed, &expected))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct-horse-battery").unwrap();
        assert!(hash.starts_with("pbkdf2:sha256:260000$"));
        assert!(verify_password("correct-horse-battery", &hash).unwrap());
    }

    #[test]
    fn test_wrong_password_fails() {
        let hash = hash_password("real-password").unwrap();
        assert!(!verify_password("wrong-password", &hash).unwrap());
    }

    #[test]
    fn test_same_password_different_salt() {
        let a = hash_password("password123").unwrap();
        let b = hash_password("password123").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_iterations_come_from_the_hash() {
        let salt = b"fixture-salt";
        let mut key = [0u8; KEY_LENGTH];
        pbkdf2::<HmacSha256>(b"older-pass", salt, 1000, &mut key).unwrap();
        let stored = format!(
            "pbkdf2:sha256:1000${}${}",
            URL_SAFE_NO_PAD.encode(salt),
            URL_SAFE_NO_PAD.encode(key)
        );

        assert!(verify_password("older-pass", &stored).unwrap());
        assert!(!verify_password("other-pass", &stored).unwrap());
    }

    #[test]
    fn test_padded_base64_is_rejected() {
        assert!(verify_password("x", "pbkdf2:sha256:1000$c2FsdA==$aGFzaA").is_err());
    }

    #[test]
    fn test_malformed_hash() {
        assert!(verify_password("x", "not-a-hash").is_err());
        assert!(verify_password("x", "bcrypt:10$abc$def").is_err());
        assert!(verify_password("x", "pbkdf2:sha256:many$abc$def").is_err());
    }
}
