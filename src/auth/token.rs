use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Audience stamped into every admin token.
pub const ADMIN_AUDIENCE: &str = "admin";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    pub login_time: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("unsupported token algorithm")]
    Algorithm,
    #[error("invalid token signature")]
    Signature,
    #[error("token expired")]
    Expired,
    #[error("token issuer or audience mismatch")]
    Claims,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::InvalidSignature => TokenError::Signature,
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => TokenError::Algorithm,
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidIssuer
            | ErrorKind::InvalidAudience
            | ErrorKind::MissingRequiredClaim(_) => TokenError::Claims,
            _ => TokenError::Malformed,
        }
    }
}

/// Signs and verifies HS256 admin tokens.
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
}

impl TokenSigner {
    pub fn new(secret: impl AsRef<[u8]>, issuer: impl Into<String>) -> Self {
        let issuer = issuer.into();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_audience(&[ADMIN_AUDIENCE]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);

        Self {
            encoding: EncodingKey::from_secret(secret.as_ref()),
            decoding: DecodingKey::from_secret(secret.as_ref()),
            validation,
            issuer,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        Ok(encode(&Header::new(Algorithm::HS256), claims, &self.encoding)?)
    }

    /// Verify signature, expiry, issuer and audience.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        Ok(decode::<Claims>(token, &self.decoding, &self.validation)?.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn claims(exp_offset: i64) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            sub: "admin".into(),
            role: "admin".into(),
            iat: now,
            exp: now + exp_offset,
            iss: "sitewarden".into(),
            aud: ADMIN_AUDIENCE.into(),
            login_time: "2024-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = TokenSigner::new(b"secret", "sitewarden");
        let issued = claims(3600);
        let token = signer.sign(&issued).unwrap();
        assert_eq!(token.split('.').count(), 3);
        assert_eq!(signer.verify(&token).unwrap(), issued);
    }

    #[test]
    fn test_expired() {
        let signer = TokenSigner::new(b"secret", "sitewarden");
        let token = signer.sign(&claims(-120)).unwrap();
        assert_eq!(signer.verify(&token), Err(TokenError::Expired));
    }

    #[test]
    fn test_wrong_secret_and_tamper() {
        let signer = TokenSigner::new(b"secret", "sitewarden");
        let other = TokenSigner::new(b"other", "sitewarden");
        let token = signer.sign(&claims(3600)).unwrap();
        assert_eq!(other.verify(&token), Err(TokenError::Signature));

        let mut tampered = claims(3600);
        tampered.role = "root".into();
        let forged_token = other.sign(&tampered).unwrap();
        let forged_payload = forged_token.split('.').nth(1).unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);
        assert_eq!(signer.verify(&forged), Err(TokenError::Signature));
    }

    #[test]
    fn test_issuer_mismatch_and_garbage() {
        let signer = TokenSigner::new(b"secret", "sitewarden");
        let mut foreign = claims(3600);
        foreign.iss = "elsewhere".into();
        let token = signer.sign(&foreign).unwrap();
        assert_eq!(signer.verify(&token), Err(TokenError::Claims));
        assert_eq!(signer.verify("abc"), Err(TokenError::Malformed));
    }

    #[test]
    fn test_other_algorithm_rejected() {
        let signer = TokenSigner::new(b"secret", "sitewarden");
        let token = encode(
            &Header::new(Algorithm::HS384),
            &claims(3600),
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert_eq!(signer.verify(&token), Err(TokenError::Algorithm));
    }
}
