//! Identity boundary: registration digests, login token pairs, and
//! bearer-token verification into an [`Actor`]. The engine itself never
//! sees tokens, only the actor context derived here.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::distributions::Alphanumeric;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

use procura_core::{Actor, Role};

const TOKEN_TYPE_ACCESS: &str = "access";
const TOKEN_TYPE_REFRESH: &str = "refresh";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("token encoding failed: {0}")]
    Encoding(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    role: String,
    typ: String,
    iat: i64,
    exp: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
}

impl TokenService {
    pub fn new(secret: &SecretString, access_ttl_secs: u64, refresh_ttl_secs: u64) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
            access_ttl_secs,
            refresh_ttl_secs,
        }
    }

    pub fn issue_pair(&self, username: &str, role: Role) -> Result<TokenPair, AuthError> {
        Ok(TokenPair {
            access: self.issue(username, role, TOKEN_TYPE_ACCESS, self.access_ttl_secs)?,
            refresh: self.issue(username, role, TOKEN_TYPE_REFRESH, self.refresh_ttl_secs)?,
        })
    }

    fn issue(
        &self,
        username: &str,
        role: Role,
        token_type: &str,
        ttl_secs: u64,
    ) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: username.to_string(),
            role: role.as_str().to_string(),
            typ: token_type.to_string(),
            iat: now,
            exp: now + ttl_secs as i64,
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    /// Verify an access token and recover the actor it identifies.
    pub fn verify_access(&self, token: &str) -> Result<Actor, AuthError> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|_| AuthError::InvalidToken)?;

        if data.claims.typ != TOKEN_TYPE_ACCESS {
            return Err(AuthError::InvalidToken);
        }

        let role = data.claims.role.parse::<Role>().map_err(|_| AuthError::InvalidToken)?;
        Ok(Actor { username: data.claims.sub, role })
    }
}

pub fn generate_salt() -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(24).map(char::from).collect()
}

pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn verify_password(password: &str, salt: &str, digest: &str) -> bool {
    // Constant-time comparison so login timing does not leak how much
    // of the digest matched.
    let computed = hash_password(password, salt);
    bool::from(computed.as_bytes().ct_eq(digest.as_bytes()))
}

/// Pull the bearer token out of an `Authorization` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ").map(str::trim).filter(|token| !token.is_empty())
}
