//! Bearer token verification
//!
//! Tokens are issued by the external identity provider; the core only
//! validates signatures and consumes the claims it needs.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Deserializer, Serialize};

use crate::utils::{ApiError, ApiResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealmAccess {
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Claims consumed from the identity provider's access token.
///
/// `cost_centres` arrives either as a JSON array or as a comma-separated
/// string depending on the provider's mapper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub tenant_id: String,
    #[serde(default)]
    pub realm_access: RealmAccess,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub zoneinfo: Option<String>,
    #[serde(default)]
    pub calendar_system: Option<String>,
    #[serde(default, deserialize_with = "deserialize_cost_centres")]
    pub cost_centres: Vec<String>,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
}

fn deserialize_cost_centres<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ArrayOrString {
        Array(Vec<String>),
        Comma(String),
    }

    match Option::<ArrayOrString>::deserialize(deserializer)? {
        Some(ArrayOrString::Array(items)) => Ok(items),
        Some(ArrayOrString::Comma(raw)) => Ok(raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()),
        None => Ok(Vec::new()),
    }
}

pub struct JwtUtil {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtUtil {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify_token(&self, token: &str) -> ApiResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| {
                tracing::debug!("Token verification failed: {}", err);
                ApiError::unauthorized("Invalid or expired token")
            })
    }

    /// Issue a token with the given claims. Used by operational tooling and
    /// tests; normal traffic carries tokens minted by the identity provider.
    pub fn issue_token(&self, claims: &Claims) -> ApiResult<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key).map_err(|err| {
            tracing::error!("Token encoding failed: {}", err);
            ApiError::internal_error("Failed to issue token")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_claims() -> Claims {
        Claims {
            sub: "user-1".into(),
            tenant_id: "clinic-a".into(),
            realm_access: RealmAccess { roles: vec!["analyst".into()] },
            locale: Some("ar".into()),
            zoneinfo: Some("Asia/Riyadh".into()),
            calendar_system: Some("hijri".into()),
            cost_centres: vec!["cc-100".into()],
            exp: chrono::Utc::now().timestamp() + 3600,
            iat: None,
        }
    }

    #[test]
    fn round_trips_a_token() {
        let util = JwtUtil::new("test-secret");
        let token = util.issue_token(&sample_claims()).unwrap();
        let claims = util.verify_token(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.tenant_id, "clinic-a");
        assert_eq!(claims.realm_access.roles, vec!["analyst"]);
    }

    #[test]
    fn rejects_a_token_signed_with_another_secret() {
        let issuer = JwtUtil::new("secret-a");
        let verifier = JwtUtil::new("secret-b");
        let token = issuer.issue_token(&sample_claims()).unwrap();
        assert!(verifier.verify_token(&token).is_err());
    }

    #[test]
    fn cost_centres_accepts_comma_separated_string() {
        let json = r#"{
            "sub": "u", "tenant_id": "t", "exp": 9999999999,
            "cost_centres": "cc-1, cc-2 ,cc-3"
        }"#;
        let claims: Claims = serde_json::from_str(json).unwrap();
        assert_eq!(claims.cost_centres, vec!["cc-1", "cc-2", "cc-3"]);
    }

    #[test]
    fn cost_centres_accepts_array() {
        let json = r#"{
            "sub": "u", "tenant_id": "t", "exp": 9999999999,
            "cost_centres": ["cc-1", "cc-2"]
        }"#;
        let claims: Claims = serde_json::from_str(json).unwrap();
        assert_eq!(claims.cost_centres, vec!["cc-1", "cc-2"]);
    }
}
