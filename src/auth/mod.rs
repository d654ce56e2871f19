//! Bearer-token authentication.
//!
//! Token issuance (login/OTP) lives in the identity service; this module
//! only validates HS256 tokens it issued and exposes the `AuthUser` /
//! `AdminUser` extractors. Gateway callbacks deliberately bypass this layer:
//! their SHA-512 hash is the authentication.

use axum::{async_trait, extract::FromRequestParts, http::header, http::request::Parts};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{errors::ServiceError, AppState};

/// Claim structure for JWT tokens
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub roles: Vec<String>,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// Authenticated caller extracted from the bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub name: Option<String>,
    pub roles: Vec<String>,
}

impl AuthUser {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role("admin")
    }

    /// First name used in the gateway payload; falls back to "Customer"
    /// when the profile carries no name.
    pub fn first_name(&self) -> String {
        self.name
            .as_deref()
            .and_then(|n| n.split_whitespace().next())
            .unwrap_or("Customer")
            .to_string()
    }
}

/// Issues and validates access tokens.
#[derive(Debug, Clone)]
pub struct AuthService {
    secret: String,
    expiration: Duration,
}

impl AuthService {
    pub fn new(secret: String, expiration_secs: u64) -> Self {
        Self {
            secret,
            expiration: Duration::seconds(expiration_secs as i64),
        }
    }

    pub fn issue_token(
        &self,
        user_id: Uuid,
        email: Option<&str>,
        name: Option<&str>,
        roles: &[&str],
    ) -> Result<String, ServiceError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.map(str::to_string),
            name: name.map(str::to_string),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + self.expiration).timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| ServiceError::InternalError(format!("token encoding failed: {e}")))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, ServiceError> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map(|data| data.claims)
        .map_err(|e| ServiceError::Unauthorized(format!("invalid token: {e}")))
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, ServiceError> {
    let value = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ServiceError::Unauthorized("missing authorization header".into()))?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .ok_or_else(|| ServiceError::Unauthorized("expected bearer token".into()))
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let claims = state.services.auth.validate_token(token)?;
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| ServiceError::Unauthorized("invalid subject claim".into()))?;
        Ok(AuthUser {
            user_id,
            email: claims.email,
            name: claims.name,
            roles: claims.roles,
        })
    }
}

/// Extractor that additionally requires the `admin` role.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(ServiceError::Forbidden("admin role required".into()));
        }
        Ok(AdminUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        AuthService::new(
            "a_test_secret_that_is_long_enough_for_validation".into(),
            3600,
        )
    }

    #[test]
    fn issued_tokens_validate() {
        let svc = service();
        let user_id = Uuid::new_v4();
        let token = svc
            .issue_token(user_id, Some("asha@example.com"), Some("Asha Rao"), &["customer"])
            .unwrap();
        let claims = svc.validate_token(&token).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.email.as_deref(), Some("asha@example.com"));
        assert_eq!(claims.roles, vec!["customer"]);
    }

    #[test]
    fn tampered_tokens_are_rejected() {
        let svc = service();
        let token = svc.issue_token(Uuid::new_v4(), None, None, &[]).unwrap();
        let mut tampered = token.clone();
        tampered.pop();
        tampered.push('x');
        assert!(svc.validate_token(&tampered).is_err());

        let other = AuthService::new("another_secret_that_is_also_long_enough!!".into(), 3600);
        assert!(other.validate_token(&token).is_err());
    }

    #[test]
    fn first_name_falls_back_when_unnamed() {
        let user = AuthUser {
            user_id: Uuid::new_v4(),
            email: None,
            name: Some("Asha Rao".into()),
            roles: vec![],
        };
        assert_eq!(user.first_name(), "Asha");

        let anon = AuthUser {
            user_id: Uuid::new_v4(),
            email: None,
            name: None,
            roles: vec![],
        };
        assert_eq!(anon.first_name(), "Customer");
    }
}
