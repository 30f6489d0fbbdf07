use axum::http::{HeaderMap, header::AUTHORIZATION};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use products_crm::CurrentUser;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims of a Supabase-style access token. Only `sub` and `exp` are required.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Verifies HS256 bearer tokens signed with the project's JWT secret.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier").finish_non_exhaustive()
    }
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Supabase tokens carry `aud: authenticated`, which is not checked
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn decode(&self, token: &str) -> jsonwebtoken::errors::Result<AccessClaims> {
        jsonwebtoken::decode::<AccessClaims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
    }

    pub fn current_user(&self, token: &str) -> jsonwebtoken::errors::Result<CurrentUser> {
        let claims = self.decode(token)?;
        Ok(CurrentUser {
            user_id: claims.sub,
            email: claims.email,
        })
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
pub(crate) fn issue_token(secret: &str, user_id: Uuid, ttl_secs: i64) -> String {
    use jsonwebtoken::{EncodingKey, Header, get_current_timestamp};

    let exp = (get_current_timestamp() as i64 + ttl_secs).max(0) as u64;
    let claims = AccessClaims {
        sub: user_id,
        exp,
        email: Some("buyer@example.com".into()),
        role: Some("authenticated".into()),
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn valid_token_yields_current_user() {
        let user_id = Uuid::new_v4();
        let token = issue_token("top-secret", user_id, 600);
        let user = JwtVerifier::new("top-secret").current_user(&token).unwrap();
        assert_eq!(user.user_id, user_id);
        assert_eq!(user.email.as_deref(), Some("buyer@example.com"));
    }

    #[test]
    fn wrong_secret_and_expired_tokens_fail() {
        let user_id = Uuid::new_v4();
        let verifier = JwtVerifier::new("top-secret");
        assert!(
            verifier
                .decode(&issue_token("other-secret", user_id, 600))
                .is_err()
        );
        assert!(verifier.decode(&issue_token("top-secret", user_id, -3600)).is_err());
        assert!(verifier.decode("not.a.jwt").is_err());
    }

    #[test]
    fn bearer_header_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer  xyz "));
        assert_eq!(bearer_token(&headers), Some("xyz"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(bearer_token(&headers), None);
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }
}
