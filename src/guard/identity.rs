//! Organizer Identity Resolution
//!
//! Sources, highest priority first:
//! 1. `organizerId` claim of a verified `Authorization: Bearer` JWT
//! 2. `x-organizer-id` header
//! 3. `organizerId` query parameter

use axum::extract::Query;
use axum::http::{header::AUTHORIZATION, HeaderMap, Uri};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Header carrying the organizer id
pub const ORGANIZER_HEADER: &str = "x-organizer-id";

/// Query parameter carrying the organizer id
pub const ORGANIZER_QUERY_PARAM: &str = "organizerId";

/// JWT errors
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("JWT processing error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Token lifetime must be positive and representable")]
    InvalidTtl,
}

/// Claims carried by organizer access tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizerClaims {
    #[serde(rename = "organizerId", alias = "organizer_id")]
    pub organizer_id: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and verifies HS256 organizer tokens
#[derive(Clone)]
pub struct OrganizerTokens {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for OrganizerTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrganizerTokens").finish_non_exhaustive()
    }
}

impl OrganizerTokens {
    /// Create from a shared secret
    pub fn from_secret(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Sign a token for an organizer
    pub fn issue(&self, organizer_id: &str, ttl: Duration) -> Result<String, TokenError> {
        if ttl <= Duration::zero() {
            return Err(TokenError::InvalidTtl);
        }

        let now = Utc::now();
        let expires = now
            .checked_add_signed(ttl)
            .ok_or(TokenError::InvalidTtl)?;
        let claims = OrganizerClaims {
            organizer_id: organizer_id.to_string(),
            iat: now.timestamp(),
            exp: expires.timestamp(),
        };

        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?)
    }

    /// Verify signature and expiry, returning the claims
    pub fn verify(&self, token: &str) -> Result<OrganizerClaims, TokenError> {
        let data = decode::<OrganizerClaims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }
}

/// Where the organizer id came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentitySource {
    Jwt,
    Header,
    Query,
}

/// Organizer id attached to a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub organizer_id: String,
    pub source: IdentitySource,
}

#[derive(Debug, Deserialize)]
struct OrganizerQuery {
    #[serde(rename = "organizerId")]
    organizer_id: Option<String>,
}

/// Resolves the organizer a request belongs to
#[derive(Debug, Clone, Default)]
pub struct IdentityResolver {
    tokens: Option<OrganizerTokens>,
}

impl IdentityResolver {
    /// Without `tokens`, bearer tokens are ignored
    pub fn new(tokens: Option<OrganizerTokens>) -> Self {
        Self { tokens }
    }

    /// First identity found, in priority order
    pub fn resolve(&self, headers: &HeaderMap, uri: &Uri) -> Option<ResolvedIdentity> {
        if let Some(organizer_id) = self.from_bearer(headers) {
            return Some(ResolvedIdentity {
                organizer_id,
                source: IdentitySource::Jwt,
            });
        }

        if let Some(organizer_id) = headers
            .get(ORGANIZER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(non_empty)
        {
            return Some(ResolvedIdentity {
                organizer_id,
                source: IdentitySource::Header,
            });
        }

        Query::<OrganizerQuery>::try_from_uri(uri)
            .ok()
            .and_then(|Query(query)| query.organizer_id)
            .as_deref()
            .and_then(non_empty)
            .map(|organizer_id| ResolvedIdentity {
                organizer_id,
                source: IdentitySource::Query,
            })
    }

    fn from_bearer(&self, headers: &HeaderMap) -> Option<String> {
        let tokens = self.tokens.as_ref()?;
        let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
        let token = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))?;

        match tokens.verify(token.trim()) {
            Ok(claims) => non_empty(&claims.organizer_id),
            Err(e) => {
                // Unverified tokens fall through to the next source
                debug!("Ignoring bearer token: {}", e);
                None
            }
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "test-secret-key-at-least-32-characters-long";

    fn resolver() -> IdentityResolver {
        IdentityResolver::new(Some(OrganizerTokens::from_secret(SECRET)))
    }

    fn bearer(token: &str) -> HeaderValue {
        HeaderValue::from_str(&format!("Bearer {}", token)).unwrap()
    }

    #[test]
    fn test_token_round_trip() {
        let tokens = OrganizerTokens::from_secret(SECRET);
        let token = tokens.issue("org_1", Duration::hours(1)).unwrap();

        let claims = tokens.verify(&token).unwrap();
        assert_eq!(claims.organizer_id, "org_1");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_issue_rejects_non_positive_ttl() {
        let tokens = OrganizerTokens::from_secret(SECRET);
        assert!(matches!(
            tokens.issue("org_1", Duration::zero()),
            Err(TokenError::InvalidTtl)
        ));
    }

    #[test]
    fn test_issue_rejects_ttl_past_calendar_range() {
        let tokens = OrganizerTokens::from_secret(SECRET);
        assert!(matches!(
            tokens.issue("org_1", Duration::days(200_000_000)),
            Err(TokenError::InvalidTtl)
        ));
    }

    #[test]
    fn test_wrong_secret_fails_verification() {
        let token = OrganizerTokens::from_secret("another-secret-another-secret-xx")
            .issue("org_1", Duration::hours(1))
            .unwrap();
        assert!(OrganizerTokens::from_secret(SECRET).verify(&token).is_err());
    }

    #[test]
    fn test_jwt_beats_header_and_query() {
        let token = OrganizerTokens::from_secret(SECRET)
            .issue("org_jwt", Duration::hours(1))
            .unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, bearer(&token));
        headers.insert(ORGANIZER_HEADER, HeaderValue::from_static("org_header"));
        let uri: Uri = "/api/organizer/profile?organizerId=org_query".parse().unwrap();

        let identity = resolver().resolve(&headers, &uri).unwrap();
        assert_eq!(identity.organizer_id, "org_jwt");
        assert_eq!(identity.source, IdentitySource::Jwt);
    }

    #[test]
    fn test_header_beats_query() {
        let mut headers = HeaderMap::new();
        headers.insert(ORGANIZER_HEADER, HeaderValue::from_static("org_header"));
        let uri: Uri = "/x?organizerId=org_query".parse().unwrap();

        let identity = resolver().resolve(&headers, &uri).unwrap();
        assert_eq!(identity.organizer_id, "org_header");
        assert_eq!(identity.source, IdentitySource::Header);
    }

    #[test]
    fn test_query_parameter() {
        let uri: Uri = "/x?page=2&organizerId=org_query".parse().unwrap();

        let identity = resolver().resolve(&HeaderMap::new(), &uri).unwrap();
        assert_eq!(identity.organizer_id, "org_query");
        assert_eq!(identity.source, IdentitySource::Query);
    }

    #[test]
    fn test_invalid_token_falls_through() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, bearer("not-a-jwt"));
        headers.insert(ORGANIZER_HEADER, HeaderValue::from_static("org_header"));
        let uri: Uri = "/x".parse().unwrap();

        let identity = resolver().resolve(&headers, &uri).unwrap();
        assert_eq!(identity.source, IdentitySource::Header);
    }

    #[test]
    fn test_bearer_ignored_without_secret() {
        let token = OrganizerTokens::from_secret(SECRET)
            .issue("org_jwt", Duration::hours(1))
            .unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, bearer(&token));
        let uri: Uri = "/x".parse().unwrap();

        assert!(IdentityResolver::default().resolve(&headers, &uri).is_none());
    }

    #[test]
    fn test_blank_values_are_missing() {
        let mut headers = HeaderMap::new();
        headers.insert(ORGANIZER_HEADER, HeaderValue::from_static("   "));
        let uri: Uri = "/x?organizerId=".parse().unwrap();

        assert!(resolver().resolve(&headers, &uri).is_none());
    }

    #[test]
    fn test_nothing_present() {
        let uri: Uri = "/x".parse().unwrap();
        assert!(resolver().resolve(&HeaderMap::new(), &uri).is_none());
    }
}
