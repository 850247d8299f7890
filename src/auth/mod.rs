use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::audit::Actor;

/// Bearer token claims: `sub` is the user id and `sid` the session the
/// audit trail checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub sid: i64,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(user_id: i64, session_id: i64, ttl: Duration) -> Self {
        let now = Utc::now();
        Self { sub: user_id, sid: session_id, exp: (now + ttl).timestamp(), iat: now.timestamp() }
    }

    pub fn actor(&self) -> Actor {
        Actor::new(self.sub, self.sid)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("JWT generation error: {0}")]
    TokenGeneration(String),

    #[error("Invalid JWT token: {0}")]
    InvalidToken(String),

    #[error("JWT secret not configured")]
    InvalidSecret,
}

pub fn generate_jwt(claims: &Claims, secret: &str) -> Result<String, JwtError> {
    if secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }

    let encoding_key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::default(), claims, &encoding_key).map_err(|e| JwtError::TokenGeneration(e.to_string()))
}

pub fn decode_jwt(token: &str, secret: &str) -> Result<Claims, JwtError> {
    if secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }

    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<Claims>(token, &decoding_key, &Validation::default())
        .map(|data| data.claims)
        .map_err(|e| JwtError::InvalidToken(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_the_actor() {
        let claims = Claims::new(7, 21, Duration::hours(1));
        let token = generate_jwt(&claims, "secret").unwrap();
        let decoded = decode_jwt(&token, "secret").unwrap();
        assert_eq!(decoded.actor(), Actor::new(7, 21));
        assert!(matches!(decode_jwt(&token, "other"), Err(JwtError::InvalidToken(_))));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let claims = Claims::new(7, 21, Duration::hours(-2));
        let token = generate_jwt(&claims, "secret").unwrap();
        assert!(decode_jwt(&token, "secret").is_err());
        assert!(matches!(generate_jwt(&claims, ""), Err(JwtError::InvalidSecret)));
    }
}
