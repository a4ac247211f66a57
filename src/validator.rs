// src/validator.rs

pub mod model;

use crate::client::JwksClient;
use crate::config::{Config, IdTokenVerification, ValidationDetails, APPLE_ISSUER};
use crate::error::NilaAppleError;
use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{decode, decode_header, Validation};
use model::IdentityClaims;
use tracing::{debug, instrument, warn};

/// Decodes the payload of an ID Token WITHOUT checking its signature or expiry.
///
/// The token must be a compact JWS: exactly three non-empty, dot separated segments.
pub fn decode_unverified(token: &str) -> Result<IdentityClaims, NilaAppleError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
        return Err(NilaAppleError::Decode(format!(
            "expected 3 non-empty segments, found {}",
            segments.len()
        )));
    }

    let payload = URL_SAFE_NO_PAD.decode(segments[1].trim_end_matches('='))?;
    serde_json::from_slice(&payload)
        .map_err(|e| NilaAppleError::Decode(format!("invalid claims payload: {}", e)))
}

/// Reads Apple ID Tokens.
///
/// When verification is enabled (the default) the token signature is checked
/// against Apple's JWKS along with `iss`, `aud` and `exp`. Create it once and
/// share it between requests; the key cache lives inside.
#[derive(Clone)]
pub struct Validator {
    client_id: String,
    validation: ValidationDetails,
    // Only present when verification is enabled.
    jwks_client: Option<JwksClient>,
}

impl Validator {
    /// Creates a new `Validator` with the given configuration.
    pub fn new(config: &Config, http_client: reqwest::Client) -> Self {
        let jwks_client = match &config.verification {
            IdTokenVerification::Jwks { jwks_uri, cache_ttl } => {
                Some(JwksClient::new(http_client, jwks_uri.clone(), *cache_ttl))
            }
            IdTokenVerification::Disabled => {
                warn!("ID Token verification is disabled; signatures and expiry will NOT be checked.");
                None
            }
        };
        Self {
            client_id: config.client_id.clone(),
            validation: config.validation.clone(),
            jwks_client,
        }
    }

    pub fn verifies_signatures(&self) -> bool {
        self.jwks_client.is_some()
    }

    /// Validates an ID Token and returns its claims.
    ///
    /// 1. Structural check of the compact token.
    /// 2. Algorithm allow-list and `kid` lookup in Apple's JWKS.
    /// 3. Signature, `exp` (with leeway), `iss` and `aud` checks.
    #[instrument(skip(self, token), err)]
    pub async fn validate(&self, token: &str) -> Result<IdentityClaims, NilaAppleError> {
        // Fail fast with a decode error on anything that is not a compact JWS,
        // and get a readable `sub` for the logs.
        let unverified = decode_unverified(token)?;

        let jwks_client = match &self.jwks_client {
            Some(client) => client,
            None => {
                warn!(sub = %unverified.sub, "Returning unverified ID Token claims.");
                return Ok(unverified);
            }
        };

        let header = decode_header(token).map_err(|e| NilaAppleError::Decode(e.to_string()))?;

        if !self.validation.algorithms.contains(&header.alg) {
            return Err(NilaAppleError::UnsupportedAlgorithm(header.alg));
        }

        let kid = header.kid.ok_or(NilaAppleError::MissingKeyId)?;
        let decoding_key = jwks_client.get_key(&kid).await?;

        let mut validation = Validation::new(header.alg);
        validation.leeway = self.validation.leeway.as_secs();
        validation.set_issuer(&[APPLE_ISSUER]);
        validation.set_audience(&[&self.client_id]);
        validation.set_required_spec_claims(&["exp", "iat", "iss", "aud", "sub"]);

        let token_data = decode::<IdentityClaims>(token, &decoding_key, &validation)?;
        debug!(sub = %token_data.claims.sub, kid = %kid, "ID Token verified.");
        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compact(payload: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","kid":"k1"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{}.{}.c2lnbmF0dXJl", header, body)
    }

    #[test]
    fn decodes_payload_without_verification() {
        let token = compact(json!({ "sub": "001.abc", "email": "user@example.com" }));
        let claims = decode_unverified(&token).unwrap();
        assert_eq!(claims.sub, "001.abc");
        assert_eq!(claims.email.as_deref(), Some("user@example.com"));
    }

    #[test]
    fn rejects_tokens_without_three_segments() {
        for token in ["", "not-a-jwt", "a.b", "a.b.c.d", "a..c"] {
            let err = decode_unverified(token).unwrap_err();
            assert!(matches!(err, NilaAppleError::Decode(_)), "token {:?}", token);
        }
    }

    #[test]
    fn rejects_payload_that_is_not_base64() {
        let err = decode_unverified("aGVhZGVy.***.c2ln").unwrap_err();
        assert!(matches!(err, NilaAppleError::Base64Decode(_)));
        assert_eq!(err.kind(), "identity_token");
    }

    #[test]
    fn rejects_payload_without_sub() {
        let token = compact(json!({ "email": "user@example.com" }));
        assert!(matches!(decode_unverified(&token), Err(NilaAppleError::Decode(_))));
    }
}
