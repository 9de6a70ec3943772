//! Identity and role resolution: password verification, signed token pairs and
//! single-session refresh-token rotation.

use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::Argon2;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

use crate::config::Config;
use crate::errors::AppError;
use crate::models::{Role, TokenPair};
use crate::store::Store;

/// Payload of both access and refresh tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: Uuid,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
    /// Unique per issued token, so two tokens minted in the same second differ.
    pub jti: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: i64,
}

/// HS256 signing material. Access and refresh tokens use distinct secrets, so
/// one can never be presented as the other.
pub struct TokenKeys {
    access: KeyPair,
    refresh: KeyPair,
    validation: Validation,
}

impl TokenKeys {
    pub fn new(
        access_secret: &str,
        refresh_secret: &str,
        access_ttl_secs: i64,
        refresh_ttl_secs: i64,
    ) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Self {
            access: KeyPair {
                encoding: EncodingKey::from_secret(access_secret.as_bytes()),
                decoding: DecodingKey::from_secret(access_secret.as_bytes()),
                ttl_secs: access_ttl_secs,
            },
            refresh: KeyPair {
                encoding: EncodingKey::from_secret(refresh_secret.as_bytes()),
                decoding: DecodingKey::from_secret(refresh_secret.as_bytes()),
                ttl_secs: refresh_ttl_secs,
            },
            validation,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.access_token_secret,
            &config.refresh_token_secret,
            config.access_token_ttl_secs,
            config.refresh_token_ttl_secs,
        )
    }

    fn keys(&self, kind: TokenKind) -> &KeyPair {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    pub fn issue(&self, kind: TokenKind, user_id: Uuid, role: Role) -> Result<String, AppError> {
        let keys = self.keys(kind);
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id,
            role,
            iat: now,
            exp: now + keys.ttl_secs,
            jti: Uuid::new_v4(),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)
            .map_err(|e| AppError::InternalError(format!("Failed to sign token: {}", e)))
    }

    pub fn issue_pair(&self, user_id: Uuid, role: Role) -> Result<TokenPair, AppError> {
        Ok(TokenPair {
            access_token: self.issue(TokenKind::Access, user_id, role)?,
            refresh_token: self.issue(TokenKind::Refresh, user_id, role)?,
        })
    }

    /// Checks signature and expiry.
    pub fn verify(
        &self,
        kind: TokenKind,
        token: &str,
    ) -> Result<Claims, jsonwebtoken::errors::Error> {
        jsonwebtoken::decode::<Claims>(token, &self.keys(kind).decoding, &self.validation)
            .map(|data| data.claims)
    }
}

/// Argon2id PHC string with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::InternalError(format!("Failed to hash password: {}", e)))
}

/// Constant-time verification against a stored PHC string.
pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool, AppError> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| AppError::InternalError(format!("Stored password hash is invalid: {}", e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Hashing is CPU-bound; keep it off the async workers.
pub async fn hash_password_blocking(password: String) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || hash_password(&password)).await?
}

async fn verify_password_blocking(password: String, stored_hash: String) -> Result<bool, AppError> {
    tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash)).await?
}

/// Stand-in hash checked when no account matches, so an unknown email costs
/// the same Argon2 work as a wrong password.
fn placeholder_hash() -> Option<&'static str> {
    static HASH: OnceLock<Option<String>> = OnceLock::new();
    HASH.get_or_init(|| hash_password("placeholder-for-unknown-accounts").ok())
        .as_deref()
}

async fn verify_against_placeholder(password: String) -> Result<(), AppError> {
    tokio::task::spawn_blocking(move || {
        if let Some(hash) = placeholder_hash() {
            let _ = verify_password(&password, hash);
        }
    })
    .await?;
    Ok(())
}

/// SHA-256 hex digest under which a refresh token is stored.
pub fn token_digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct AuthService {
    store: Arc<dyn Store>,
    keys: Arc<TokenKeys>,
}

impl AuthService {
    pub fn new(store: Arc<dyn Store>, keys: Arc<TokenKeys>) -> Self {
        Self { store, keys }
    }

    /// Verifies credentials, resolves the user's role and opens a new session.
    /// Any previous refresh token of the user stops working.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<TokenPair, AppError> {
        let email = email.trim().to_lowercase();
        let Some(user) = self.store.find_user_by_email(&email).await? else {
            verify_against_placeholder(password.to_string()).await?;
            return Err(AppError::InvalidCredentials);
        };

        if !verify_password_blocking(password.to_string(), user.password_hash.clone()).await? {
            tracing::warn!("Failed login attempt for user {}", user.id);
            return Err(AppError::InvalidCredentials);
        }

        let profile = match self.store.find_profile_by_user(user.id).await? {
            Some(profile) => profile,
            None => {
                tracing::warn!("User {} has no role profile; refusing login", user.id);
                return Err(AppError::InvalidCredentials);
            }
        };

        let pair = self.keys.issue_pair(user.id, profile.role())?;
        self.store
            .replace_refresh_token(user.id, &token_digest(&pair.refresh_token))
            .await?;

        tracing::info!("User {} logged in as {}", user.id, profile.kind);
        Ok(pair)
    }

    /// Exchanges the active refresh token for a new pair.
    ///
    /// A token that verifies but is no longer the stored one (superseded by a
    /// later login or refresh, or revoked by logout) is rejected.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AppError> {
        let claims = self
            .keys
            .verify(TokenKind::Refresh, refresh_token)
            .map_err(|e| AppError::InvalidToken(e.to_string()))?;

        let profile = self
            .store
            .find_profile_by_user(claims.sub)
            .await?
            .ok_or_else(|| AppError::InvalidToken("account no longer exists".to_string()))?;

        let pair = self.keys.issue_pair(claims.sub, profile.role())?;
        let rotated = self
            .store
            .rotate_refresh_token(
                claims.sub,
                &token_digest(refresh_token),
                &token_digest(&pair.refresh_token),
            )
            .await?;

        if !rotated {
            return Err(AppError::InvalidToken(format!(
                "refresh token for user {} is not the active one",
                claims.sub
            )));
        }

        tracing::debug!("Rotated refresh token for user {}", claims.sub);
        Ok(pair)
    }

    pub async fn logout(&self, user_id: Uuid) -> Result<(), AppError> {
        if self.store.revoke_refresh_token(user_id).await? {
            tracing::info!("User {} logged out", user_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> TokenKeys {
        TokenKeys::new("access-secret-for-tests", "refresh-secret-for-tests", 600, 21_600)
    }

    #[test]
    fn test_password_hash_verifies_and_is_salted() {
        let first = hash_password("123456").unwrap();
        let second = hash_password("123456").unwrap();

        assert_ne!(first, second);
        assert!(verify_password("123456", &first).unwrap());
        assert!(!verify_password("654321", &first).unwrap());
    }

    #[test]
    fn test_tokens_carry_role_and_expiry() {
        let keys = keys();
        let user_id = Uuid::new_v4();
        let role = Role::Analyst(Uuid::new_v4());

        let token = keys.issue(TokenKind::Access, user_id, role).unwrap();
        let claims = keys.verify(TokenKind::Access, &token).unwrap();

        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.role, role);
        assert_eq!(claims.exp - claims.iat, 600);
    }

    #[test]
    fn test_access_and_refresh_keys_are_not_interchangeable() {
        let keys = keys();
        let role = Role::Customer(Uuid::new_v4());
        let refresh = keys.issue(TokenKind::Refresh, Uuid::new_v4(), role).unwrap();

        assert!(keys.verify(TokenKind::Access, &refresh).is_err());
        assert!(keys.verify(TokenKind::Refresh, &refresh).is_ok());
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let keys = TokenKeys::new("a-secret", "r-secret", -5, -5);
        let token = keys
            .issue(TokenKind::Access, Uuid::new_v4(), Role::Admin(Uuid::new_v4()))
            .unwrap();
        assert!(keys.verify(TokenKind::Access, &token).is_err());
    }

    #[test]
    fn test_pairs_issued_back_to_back_differ() {
        let keys = keys();
        let user_id = Uuid::new_v4();
        let role = Role::Customer(Uuid::new_v4());

        let a = keys.issue_pair(user_id, role).unwrap();
        let b = keys.issue_pair(user_id, role).unwrap();
        assert_ne!(a.refresh_token, b.refresh_token);
        assert_ne!(token_digest(&a.refresh_token), token_digest(&b.refresh_token));
    }

    #[test]
    fn test_token_digest_is_sha256_hex() {
        let digest = token_digest("abc");
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_placeholder_hash_is_a_real_argon2_hash() {
        let hash = placeholder_hash().unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(!verify_password("123456", hash).unwrap());
    }

    #[tokio::test]
    async fn test_unknown_email_is_invalid_credentials() {
        let service = AuthService::new(
            Arc::new(crate::memory_store::MemoryStore::new()),
            Arc::new(keys()),
        );

        let err = service
            .authenticate("nobody@example.com", "123456")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidCredentials));
    }
}
