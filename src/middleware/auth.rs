//! Identity gate: turns the `Authorization: Bearer <token>` header into a
//! verified [`Identity`] and, for registered accounts, a [`Caller`].

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::config::{IdentityConfig, IdentityKey};
use crate::domain::User;
use crate::error::{AppError, AuthFailure};
use crate::ports::RepositoryError;
use crate::AppState;

/// Claims read from the identity provider's token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    pub exp: usize,
}

/// Who the token says the caller is. Not yet checked against the user store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub name: Option<String>,
    pub picture: Option<String>,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Identity {
            user_id: claims.sub,
            email: claims.email.map(|e| e.trim().to_ascii_lowercase()),
            email_verified: claims.email_verified,
            name: claims.name,
            picture: claims.picture,
        }
    }
}

pub struct IdentityVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl IdentityVerifier {
    pub fn from_config(config: &IdentityConfig) -> anyhow::Result<Self> {
        let (key, algorithm) = match &config.key {
            IdentityKey::Secret(secret) => {
                (DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256)
            }
            IdentityKey::PublicKeyPem(pem) => (
                DecodingKey::from_rsa_pem(pem.as_bytes())
                    .map_err(|e| anyhow::anyhow!("invalid IDENTITY_JWT_PUBLIC_KEY: {}", e))?,
                Algorithm::RS256,
            ),
        };

        let mut validation = Validation::new(algorithm);
        match &config.audience {
            Some(audience) => validation.set_audience(&[audience.as_str()]),
            None => validation.validate_aud = false,
        }
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer.as_str()]);
        }

        Ok(Self { key, validation })
    }

    /// Shared-secret verifier without issuer or audience checks.
    pub fn hs256(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<Identity, AuthFailure> {
        match decode::<Claims>(token, &self.key, &self.validation) {
            Ok(data) => Ok(data.claims.into()),
            Err(e) => match e.kind() {
                ErrorKind::ExpiredSignature => Err(AuthFailure::Expired),
                _ => {
                    tracing::debug!(error = %e, "Identity token rejected");
                    Err(AuthFailure::Invalid)
                }
            },
        }
    }
}

fn bearer_token(parts: &Parts) -> Result<Option<&str>, AuthFailure> {
    let Some(value) = parts.headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| AuthFailure::Invalid)?;
    let (scheme, token) = value.trim().split_once(' ').ok_or(AuthFailure::Invalid)?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return Err(AuthFailure::Invalid);
    }
    Ok(Some(token.trim()))
}

#[async_trait]
impl FromRequestParts<AppState> for Identity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .map_err(AppError::Unauthenticated)?
            .ok_or(AppError::Unauthenticated(AuthFailure::Missing))?;
        state.verifier.verify(token).map_err(AppError::Unauthenticated)
    }
}

/// A verified identity backed by a registered account.
#[derive(Debug, Clone)]
pub struct Caller {
    pub identity: Identity,
    pub user: User,
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let identity = Identity::from_request_parts(parts, state).await?;
        match state.users.find(&identity.user_id).await {
            Ok(user) => Ok(Caller { identity, user }),
            Err(RepositoryError::NotFound { .. }) => Err(AppError::Forbidden(
                "account is not registered; call POST /users first".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

/// Optional caller for public routes. No header means anonymous; a bad
/// token is still an error.
#[derive(Debug, Clone)]
pub struct MaybeCaller(pub Option<Caller>);

impl MaybeCaller {
    pub fn user(&self) -> Option<&User> {
        self.0.as_ref().map(|caller| &caller.user)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for MaybeCaller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if !parts.headers.contains_key(AUTHORIZATION) {
            return Ok(MaybeCaller(None));
        }
        match Caller::from_request_parts(parts, state).await {
            Ok(caller) => Ok(MaybeCaller(Some(caller))),
            Err(AppError::Forbidden(_)) => Ok(MaybeCaller(None)),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "identity-test-secret";

    fn now() -> usize {
        chrono::Utc::now().timestamp() as usize
    }

    fn token(sub: &str, exp: usize, secret: &str) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            email: Some("Rider@Example.com".to_string()),
            email_verified: true,
            name: Some("Rider".to_string()),
            picture: None,
            exp,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn accepts_valid_token() {
        let verifier = IdentityVerifier::hs256(SECRET);
        let identity = verifier.verify(&token("u1", now() + 3600, SECRET)).unwrap();
        assert_eq!(identity.user_id, "u1");
        assert_eq!(identity.email.as_deref(), Some("rider@example.com"));
    }

    #[test]
    fn expired_token_is_reported_as_expired() {
        let verifier = IdentityVerifier::hs256(SECRET);
        let err = verifier.verify(&token("u1", now() - 3600, SECRET)).unwrap_err();
        assert_eq!(err, AuthFailure::Expired);
    }

    #[test]
    fn wrong_key_and_garbage_are_invalid() {
        let verifier = IdentityVerifier::hs256(SECRET);
        assert_eq!(
            verifier.verify(&token("u1", now() + 3600, "other")).unwrap_err(),
            AuthFailure::Invalid
        );
        assert_eq!(verifier.verify("not.a.jwt").unwrap_err(), AuthFailure::Invalid);
    }

    #[test]
    fn enforces_configured_issuer() {
        let verifier = IdentityVerifier::from_config(&IdentityConfig {
            key: IdentityKey::Secret(SECRET.to_string()),
            issuer: Some("https://issuer.example".to_string()),
            audience: None,
        })
        .unwrap();
        assert_eq!(
            verifier.verify(&token("u1", now() + 3600, SECRET)).unwrap_err(),
            AuthFailure::Invalid
        );
    }

    #[test]
    fn rejects_bad_public_key() {
        let result = IdentityVerifier::from_config(&IdentityConfig {
            key: IdentityKey::PublicKeyPem("not a pem".to_string()),
            issuer: None,
            audience: None,
        });
        assert!(result.is_err());
    }

    #[test]
    fn parses_bearer_header() {
        let (parts, _) = Request::builder()
            .header(AUTHORIZATION, "bearer abc.def.ghi")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(bearer_token(&parts), Ok(Some("abc.def.ghi")));

        let (parts, _) = Request::builder()
            .header(AUTHORIZATION, "Basic dXNlcjpwYXNz")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(bearer_token(&parts), Err(AuthFailure::Invalid));

        let (parts, _) = Request::builder().body(()).unwrap().into_parts();
        assert_eq!(bearer_token(&parts), Ok(None));
    }
}
