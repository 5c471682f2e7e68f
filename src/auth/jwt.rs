use jsonwebtoken::{decode, DecodingKey, Validation};

use crate::config::JwtConfig;
use crate::error::AppError;

use super::Claims;

pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(config: &JwtConfig) -> Self {
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        let mut validation = Validation::default();

        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }

        if let Some(ref audience) = config.audience {
            validation.set_audience(&[audience]);
        }

        Self {
            decoding_key,
            validation,
        }
    }

    pub fn validate(&self, token: &str) -> Result<Claims, AppError> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AppError::Auth(format!("Invalid token: {}", e)))?;

        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn create_test_config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret-key-for-testing".to_string(),
            issuer: None,
            audience: None,
        }
    }

    fn create_test_token(claims: &Claims, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_token() {
        let config = create_test_config();
        let validator = JwtValidator::new(&config);

        let token = create_test_token(&Claims::new("42", 3600), &config.secret);
        let claims = validator.validate(&token).unwrap();

        assert_eq!(claims.user_id(), "42");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let validator = JwtValidator::new(&create_test_config());

        let token = create_test_token(&Claims::new("42", 3600), "another-secret");
        assert!(matches!(validator.validate(&token), Err(AppError::Auth(_))));
    }

    #[test]
    fn test_expired_token_rejected() {
        let config = create_test_config();
        let validator = JwtValidator::new(&config);

        let token = create_test_token(&Claims::new("42", -3600), &config.secret);
        assert!(validator.validate(&token).is_err());
    }

    #[test]
    fn test_invalid_token() {
        let validator = JwtValidator::new(&create_test_config());
        assert!(validator.validate("invalid-token").is_err());
    }
}
