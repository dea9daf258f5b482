use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{AppError, Result};

/// Clock skew tolerated when checking `exp`.
pub const TOKEN_LEEWAY_SECS: u64 = 60;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // User ID
    pub sid: String, // Session ID
    pub email: String,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn user_id(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::Auth("Invalid user ID in token".to_string()))
    }

    pub fn session_id(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.sid).map_err(|_| AppError::Auth("Invalid session ID in token".to_string()))
    }
}

pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    session_duration: Duration,
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_ref()),
            decoding_key: DecodingKey::from_secret(secret.as_ref()),
            session_duration: Duration::hours(24),
        }
    }

    pub fn generate_session_token(&self, user_id: Uuid, session_id: Uuid, email: &str) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            sid: session_id.to_string(),
            email: email.to_string(),
            exp: (now + self.session_duration).timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AppError::Auth(format!("Failed to generate session token: {}", e)))
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.leeway = TOKEN_LEEWAY_SECS;
        let token_data = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| AppError::Auth(format!("Invalid token: {}", e)))?;

        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_token_round_trip() {
        let jwt_service = JwtService::new("test-secret");
        let user_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();

        let token = jwt_service
            .generate_session_token(user_id, session_id, "test@example.com")
            .unwrap();
        let claims = jwt_service.verify_token(&token).unwrap();

        assert_eq!(claims.user_id().unwrap(), user_id);
        assert_eq!(claims.session_id().unwrap(), session_id);
        assert_eq!(claims.email, "test@example.com");
    }

    #[test]
    fn test_token_from_other_secret_is_rejected() {
        let token = JwtService::new("one")
            .generate_session_token(Uuid::new_v4(), Uuid::new_v4(), "a@b.co")
            .unwrap();
        assert!(matches!(
            JwtService::new("two").verify_token(&token),
            Err(AppError::Auth(_))
        ));
    }
}
