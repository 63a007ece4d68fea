//! JWT issuing and verification
//!
//! Two token types share one signing key: login tokens carried as bearer
//! auth, and short-lived single-use download tokens handed out after a code
//! redemption.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("wrong token type")]
    WrongTokenType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Login,
    Download,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: Uuid,
    pub token_type: TokenType,
    pub is_admin: bool,
    /// Purchase the download token is bound to; login tokens carry none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase_id: Option<Uuid>,
    pub exp: i64,
}

#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    login_expiry_hours: i64,
    download_expiry_minutes: i64,
}

impl JwtManager {
    pub fn new(secret: &str, login_expiry_hours: i64, download_expiry_minutes: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            login_expiry_hours,
            download_expiry_minutes,
        }
    }

    pub fn issue_login_token(&self, user_id: Uuid, is_admin: bool) -> Result<String, JwtError> {
        let exp = OffsetDateTime::now_utc() + time::Duration::hours(self.login_expiry_hours);
        self.issue(Claims {
            sub: user_id,
            token_type: TokenType::Login,
            is_admin,
            purchase_id: None,
            exp: exp.unix_timestamp(),
        })
    }

    /// A short-lived token the client exchanges for the actual file download.
    pub fn issue_download_token(
        &self,
        user_id: Uuid,
        purchase_id: Uuid,
    ) -> Result<String, JwtError> {
        let exp =
            OffsetDateTime::now_utc() + time::Duration::minutes(self.download_expiry_minutes);
        self.issue(Claims {
            sub: user_id,
            token_type: TokenType::Download,
            is_admin: false,
            purchase_id: Some(purchase_id),
            exp: exp.unix_timestamp(),
        })
    }

    pub fn verify_login_token(&self, token: &str) -> Result<Claims, JwtError> {
        let claims = self.verify(token)?;
        if claims.token_type != TokenType::Login {
            return Err(JwtError::WrongTokenType);
        }
        Ok(claims)
    }

    fn issue(&self, claims: Claims) -> Result<String, JwtError> {
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| JwtError::Invalid(e.to_string()))
    }

    fn verify(&self, token: &str) -> Result<Claims, JwtError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| JwtError::Invalid(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_login_token_round_trip() {
        let manager = JwtManager::new("test-secret", 24, 10);
        let user_id = Uuid::new_v4();

        let token = manager.issue_login_token(user_id, false).unwrap();
        let claims = manager.verify_login_token(&token).unwrap();

        assert_eq!(claims.sub, user_id);
        assert!(!claims.is_admin);
    }

    #[test]
    fn test_download_token_rejected_as_login() {
        let manager = JwtManager::new("test-secret", 24, 10);
        let token = manager
            .issue_download_token(Uuid::new_v4(), Uuid::new_v4())
            .unwrap();

        assert!(matches!(
            manager.verify_login_token(&token),
            Err(JwtError::WrongTokenType)
        ));
    }

    #[test]
    fn test_token_signed_with_other_secret_rejected() {
        let manager = JwtManager::new("test-secret", 24, 10);
        let other = JwtManager::new("other-secret", 24, 10);
        let token = other.issue_login_token(Uuid::new_v4(), false).unwrap();

        assert!(matches!(
            manager.verify_login_token(&token),
            Err(JwtError::Invalid(_))
        ));
    }
}
