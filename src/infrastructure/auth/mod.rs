//! # 身份认证
//!
//! 校验 HS256 JWT，提取调用方用户 ID。网关与 HTTP 接口共用。

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::error::{MessagingError, Result};

/// Token Claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// 用户ID
    pub sub: String,
    /// 角色列表
    #[serde(default)]
    pub roles: Vec<String>,
    /// 过期时间（Unix时间戳）
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Token 认证器
pub struct TokenAuthenticator {
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
    validation: Validation,
    issuer: Option<String>,
}

impl TokenAuthenticator {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = config.leeway_secs;
        if let Some(issuer) = &config.jwt_issuer {
            validation.set_issuer(&[issuer.as_str()]);
        }

        Self {
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            issuer: config.jwt_issuer.clone(),
        }
    }

    /// 校验 token 并返回用户 ID
    pub fn authenticate(&self, token: &str) -> Result<String> {
        let token = token.trim();
        if token.is_empty() {
            return Err(MessagingError::Unauthenticated("missing token".to_string()));
        }

        let claims = decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| {
                warn!(error = %err, "token validation failed");
                MessagingError::Unauthenticated("invalid or expired token".to_string())
            })?
            .claims;

        if claims.sub.trim().is_empty() {
            return Err(MessagingError::Unauthenticated(
                "token has no subject".to_string(),
            ));
        }
        debug!(user_id = %claims.sub, "token authenticated");
        Ok(claims.sub)
    }

    /// 签发 token（开发环境与测试使用）
    pub fn issue(&self, user_id: &str, ttl_secs: i64) -> Result<String> {
        let claims = TokenClaims {
            sub: user_id.to_string(),
            roles: Vec::new(),
            exp: Utc::now().timestamp() + ttl_secs,
            iss: self.issuer.clone(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|err| MessagingError::Unauthenticated(format!("failed to sign token: {err}")))
    }
}

/// 从 `Authorization: Bearer <token>` 中取出 token
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(secret: &str) -> AuthConfig {
        AuthConfig {
            jwt_secret: secret.into(),
            jwt_issuer: Some("estate".into()),
            leeway_secs: 0,
        }
    }

    #[test]
    fn issued_token_round_trips() {
        let auth = TokenAuthenticator::new(&config("s3cret"));
        let token = auth.issue("buyer-1", 60).unwrap();
        assert_eq!(auth.authenticate(&token).unwrap(), "buyer-1");
    }

    #[test]
    fn rejects_foreign_and_expired_tokens() {
        let auth = TokenAuthenticator::new(&config("s3cret"));
        let other = TokenAuthenticator::new(&config("different"));

        let foreign = other.issue("buyer-1", 60).unwrap();
        assert!(matches!(
            auth.authenticate(&foreign),
            Err(MessagingError::Unauthenticated(_))
        ));

        let expired = auth.issue("buyer-1", -120).unwrap();
        assert!(auth.authenticate(&expired).is_err());
        assert!(auth.authenticate("").is_err());
        assert!(auth.authenticate("not-a-jwt").is_err());
    }

    #[test]
    fn parses_bearer_header() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer  abc "), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
    }
}
