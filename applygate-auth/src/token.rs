//! Stateless bearer tokens.
//!
//! Tokens are HS256 JWTs carrying `{sub, principal, roles, iat, exp}`.
//! Verification checks signature and expiry with zero leeway, then
//! consults a validation cache keyed by a hash of the token so the
//! subject lookup round-trip is skipped for recently-seen tokens.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use applygate_core::types::{Role, Subject};

use crate::cache::TokenCache;
use crate::error::AuthError;

/// Cache TTL ceiling; the effective TTL is bounded by the token's
/// remaining life.
const MAX_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub principal: String,
    pub roles: Vec<Role>,
    pub iat: i64,
    pub exp: i64,
}

/// Resolves a verified token's subject against an authoritative store.
///
/// The default [`ClaimsResolver`] trusts the claims as-is; the server
/// wires an implementation that confirms the user row still exists.
pub trait SubjectResolver: Send + Sync + 'static {
    fn resolve<'a>(
        &'a self,
        claims: &'a Claims,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Subject, AuthError>> + Send + 'a>>;
}

/// Builds the subject straight from the claims, no store round-trip.
pub struct ClaimsResolver;

impl SubjectResolver for ClaimsResolver {
    fn resolve<'a>(
        &'a self,
        claims: &'a Claims,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Subject, AuthError>> + Send + 'a>>
    {
        Box::pin(async move {
            Ok(Subject {
                id: claims.sub,
                principal: claims.principal.clone(),
                roles: claims.roles.clone(),
            })
        })
    }
}

/// Issues and verifies bearer tokens.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_ttl: Duration,
    cache: TokenCache,
    resolver: Arc<dyn SubjectResolver>,
}

impl TokenService {
    pub fn new(secret: &[u8], token_ttl: Duration, resolver: Arc<dyn SubjectResolver>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            token_ttl,
            cache: TokenCache::new(),
            resolver,
        }
    }

    /// Issue a token for the subject, valid for the configured lifetime.
    pub fn issue(&self, subject: &Subject) -> Result<String, AuthError> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: subject.id,
            principal: subject.principal.clone(),
            roles: subject.roles.clone(),
            iat: now,
            exp: now + self.token_ttl.as_secs() as i64,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }

    /// Verify a token and return its subject.
    ///
    /// The validation cache is consulted first; a hit skips both the
    /// signature check (the hash key proves we saw this exact token) and
    /// the resolver round-trip. Cached entries never outlive the token.
    pub async fn verify(&self, token: &str) -> Result<Subject, AuthError> {
        if let Some(subject) = self.cache.get(token) {
            debug!(subject = %subject.id, "token cache hit");
            return Ok(subject);
        }

        let claims = self.decode(token)?;
        let subject = self.resolver.resolve(&claims).await?;

        let remaining = claims.exp - chrono::Utc::now().timestamp();
        if remaining > 0 {
            let ttl = MAX_CACHE_TTL.min(Duration::from_secs(remaining as u64));
            self.cache.insert(token, subject.clone(), ttl);
        }
        debug!(subject = %subject.id, "token verified");
        Ok(subject)
    }

    fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // A token exactly at expiry is rejected.
        validation.leeway = 0;
        validation.validate_exp = true;

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            })?;

        // The library treats exp == now as live; here a token exactly at
        // expiry is already dead.
        if claims.exp <= chrono::Utc::now().timestamp() {
            return Err(AuthError::TokenExpired);
        }
        Ok(claims)
    }
}
