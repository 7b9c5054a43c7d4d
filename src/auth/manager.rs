use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use super::password::{constant_time_eq, verify_password};
use super::token::{Claims, TokenError, TokenSigner, ADMIN_AUDIENCE};
use crate::config::settings::AdminConfig;
use crate::models::event::EventKind;
use crate::storage::event_log::EventLog;

const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginSuccess {
    pub token: String,
    pub expires_in: u64,
    pub user: LoginUser,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginUser {
    pub username: String,
    pub role: String,
    pub login_time: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Failed to issue token")]
    Token(#[from] TokenError),
}

/// Single-administrator credential check and token issuance.
pub struct AuthManager {
    username: String,
    password_hash: String,
    token_ttl_secs: u64,
    signer: TokenSigner,
    events: Arc<EventLog>,
}

impl AuthManager {
    pub fn new(config: &AdminConfig, events: Arc<EventLog>) -> Self {
        let secret = if config.token_secret.is_empty() {
            warn!("admin.token_secret is empty, using a random per-process secret; tokens will not survive a restart");
            let bytes: [u8; 32] = rand::rng().random();
            bytes.to_vec()
        } else {
            config.token_secret.as_bytes().to_vec()
        };

        Self {
            username: config.username.clone(),
            password_hash: config.password_hash.clone(),
            token_ttl_secs: config.token_ttl_secs,
            signer: TokenSigner::new(secret, config.token_issuer.clone()),
            events,
        }
    }

    /// Check credentials and issue a token. Both outcomes are logged.
    pub fn authenticate(
        &self,
        username: &str,
        password: &str,
        ip: &str,
        user_agent: Option<&str>,
    ) -> Result<LoginSuccess, AuthError> {
        let user_ok = constant_time_eq(username.as_bytes(), self.username.as_bytes());
        // Always run the KDF so an unknown user costs the same as a bad password.
        let password_ok = verify_password(password, &self.password_hash);

        if !user_ok || !password_ok {
            let reason = if user_ok { "invalid_password" } else { "invalid_username" };
            self.events.record(
                EventKind::AuthFailed,
                json!({
                    "username": username,
                    "ip": ip,
                    "userAgent": user_agent,
                    "reason": reason,
                }),
            );
            return Err(AuthError::InvalidCredentials);
        }

        let now = Utc::now();
        let login_time = now.to_rfc3339();
        let claims = Claims {
            sub: self.username.clone(),
            role: ADMIN_ROLE.to_string(),
            iat: now.timestamp(),
            exp: now.timestamp() + self.token_ttl_secs as i64,
            iss: self.signer.issuer().to_string(),
            aud: ADMIN_AUDIENCE.to_string(),
            login_time: login_time.clone(),
        };
        let token = self.signer.sign(&claims)?;

        info!(username = %self.username, ip, "Admin login");
        self.events.record(
            EventKind::AuthSuccess,
            json!({ "username": self.username, "ip": ip, "userAgent": user_agent }),
        );

        Ok(LoginSuccess {
            token,
            expires_in: self.token_ttl_secs,
            user: LoginUser {
                username: self.username.clone(),
                role: ADMIN_ROLE.to_string(),
                login_time,
            },
        })
    }

    /// Validate a bearer token and require the admin role.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let claims = self.signer.verify(token)?;
        if claims.role != ADMIN_ROLE {
            return Err(TokenError::Claims);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::hash_password_with_salt;
    use crate::storage::sqlite::SqliteStore;

    fn manager(secret: &str) -> (AuthManager, Arc<EventLog>) {
        let events = Arc::new(EventLog::new(Arc::new(SqliteStore::in_memory().unwrap()), 100));
        let config = AdminConfig {
            username: "admin".into(),
            password_hash: hash_password_with_salt("hunter2", b"salt", 100),
            token_secret: secret.into(),
            token_ttl_secs: 3600,
            token_issuer: "sitewarden".into(),
        };
        (AuthManager::new(&config, events.clone()), events)
    }

    #[test]
    fn test_login_issues_verifiable_token() {
        let (auth, events) = manager("secret");
        let ok = auth.authenticate("admin", "hunter2", "10.0.0.1", Some("ua")).unwrap();
        assert_eq!(ok.expires_in, 3600);
        assert_eq!(ok.user.role, "admin");

        let claims = auth.verify(&ok.token).unwrap();
        assert_eq!(claims.sub, "admin");
        assert_eq!(events.count(EventKind::AuthSuccess).unwrap(), 1);
    }

    #[test]
    fn test_bad_credentials_logged_with_reason() {
        let (auth, events) = manager("secret");
        assert_eq!(
            auth.authenticate("admin", "wrong", "10.0.0.1", None).unwrap_err(),
            AuthError::InvalidCredentials
        );
        assert_eq!(
            auth.authenticate("root", "hunter2", "10.0.0.1", None).unwrap_err(),
            AuthError::InvalidCredentials
        );

        let recent = events.recent(2).unwrap();
        assert_eq!(recent[0].data["reason"], "invalid_username");
        assert_eq!(recent[1].data["reason"], "invalid_password");
    }

    #[test]
    fn test_empty_secret_still_signs() {
        let (auth, _) = manager("");
        let ok = auth.authenticate("admin", "hunter2", "10.0.0.1", None).unwrap();
        assert!(auth.verify(&ok.token).is_ok());

        let (other, _) = manager("");
        assert!(other.verify(&ok.token).is_err());
    }
}
