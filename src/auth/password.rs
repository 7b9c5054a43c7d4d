use pbkdf2::pbkdf2_hmac;
use rand::Rng;
use sha2::Sha256;

const SCHEME: &str = "pbkdf2-sha256";
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Hash `password` with a fresh random salt.
pub fn hash_password(password: &str) -> String {
    let salt: [u8; 16] = rand::rng().random();
    hash_password_with_salt(password, &salt, DEFAULT_ITERATIONS)
}

/// PBKDF2-HMAC-SHA256 with a single 32-byte output block, encoded as
/// `pbkdf2-sha256$<iterations>$<salt_hex>$<digest_hex>`.
pub fn hash_password_with_salt(password: &str, salt: &[u8], iterations: u32) -> String {
    let digest = pbkdf2_block(password.as_bytes(), salt, iterations.max(1));
    format!(
        "{}${}${}${}",
        SCHEME,
        iterations.max(1),
        hex::encode(salt),
        hex::encode(digest)
    )
}

/// Check `password` against a stored hash. Malformed hashes never verify.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some(scheme), Some(iter), Some(salt), Some(digest), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };
    if scheme != SCHEME {
        return false;
    }
    let Ok(iterations) = iter.parse::<u32>() else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (hex::decode(salt), hex::decode(digest)) else {
        return false;
    };
    if iterations == 0 {
        return false;
    }

    let actual = pbkdf2_block(password.as_bytes(), &salt, iterations);
    constant_time_eq(&actual, &expected)
}

fn pbkdf2_block(password: &[u8], salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut out = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
    out
}

/// Constant-time byte comparison to prevent timing attacks on credential checks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password_with_salt("s3cret", b"salty", 1000);
        assert!(hash.starts_with("pbkdf2-sha256$1000$"));
        assert!(verify_password("s3cret", &hash));
        assert!(!verify_password("S3cret", &hash));
    }

    #[test]
    fn test_random_salt_differs() {
        let a = hash_password("pw");
        let b = hash_password("pw");
        assert_ne!(a, b);
        assert!(verify_password("pw", &a));
        assert!(verify_password("pw", &b));
    }

    #[test]
    fn test_pbkdf2_known_vector() {
        // RFC 7914 section 11, PBKDF2-HMAC-SHA256 P="passwd" S="salt" c=1 (first 32 bytes).
        let out = pbkdf2_block(b"passwd", b"salt", 1);
        assert_eq!(
            hex::encode(out),
            "55ac046e56e3089fec1691c22544b605f94185216dde0465e68b9d57c20dacbc"
        );
    }

    #[test]
    fn test_malformed_hash_rejected() {
        assert!(!verify_password("pw", ""));
        assert!(!verify_password("pw", "plain-text"));
        assert!(!verify_password("pw", "pbkdf2-sha256$x$00$00"));
        assert!(!verify_password("pw", "md5$1$00$00"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
