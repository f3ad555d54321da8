use std::sync::Arc;

use axum::http::HeaderMap;
use axum_extra::extract::CookieJar;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use agora_db::Database;
use agora_types::api::Claims;

/// The user a gateway connection acts for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub username: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no session cookie")]
    MissingToken,

    #[error("invalid session token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("token subject {0} does not resolve to a user")]
    UnknownUser(Uuid),

    #[error("user directory lookup failed: {0}")]
    Directory(anyhow::Error),
}

/// Resolves the identity of a connecting client from its handshake cookies.
#[derive(Clone)]
pub struct SessionAuthenticator {
    db: Arc<Database>,
    jwt_secret: String,
    cookie_name: String,
}

impl SessionAuthenticator {
    pub fn new(db: Arc<Database>, jwt_secret: String, cookie_name: String) -> Self {
        Self {
            db,
            jwt_secret,
            cookie_name,
        }
    }

    /// Token carried by the session cookie, if the handshake sent one.
    pub fn token_from_headers(&self, headers: &HeaderMap) -> Option<String> {
        CookieJar::from_headers(headers)
            .get(&self.cookie_name)
            .map(|cookie| cookie.value().to_string())
            .filter(|token| !token.is_empty())
    }

    /// Check signature and expiry.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(token_data.claims)
    }

    /// Full handshake check: cookie present, token valid, user still exists.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Principal, AuthError> {
        let token = self.token_from_headers(headers).ok_or(AuthError::MissingToken)?;
        let claims = self.verify(&token)?;

        let db = self.db.clone();
        let user_id = claims.sub;
        let user = tokio::task::spawn_blocking(move || db.get_user_by_id(user_id))
            .await
            .map_err(|e| AuthError::Directory(anyhow::anyhow!("spawn_blocking join error: {}", e)))?
            .map_err(AuthError::Directory)?
            .ok_or(AuthError::UnknownUser(user_id))?;

        Ok(Principal {
            user_id: user.id,
            username: user.username,
        })
    }
}

/// Sign a session token valid for `ttl`.
pub fn create_token(
    secret: &str,
    user_id: Uuid,
    username: &str,
    ttl: chrono::Duration,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
