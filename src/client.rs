// src/client.rs

use crate::error::NilaAppleError;
use crate::validator::model::{JsonWebKey, JsonWebKeySet};
use jsonwebtoken::DecodingKey;
use moka::future::Cache;
use moka::Expiry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};
use url::Url;

/// A client for fetching and caching Apple's JSON Web Keys (JWKs).
#[derive(Clone)]
pub struct JwksClient {
    // The client is internally ref-counted to allow for cheap cloning.
    inner: Arc<Inner>,
}

struct Inner {
    http_client: reqwest::Client,
    jwks_uri: Url,
    default_cache_ttl: Duration,
    // Cache stores `kid` -> `DecodingKey`, each entry with the TTL of the response it came from.
    key_cache: Cache<String, CachedKey>,
}

#[derive(Clone)]
struct CachedKey {
    key: Arc<DecodingKey>,
    ttl: Duration,
}

struct PerKeyExpiry;

impl Expiry<String, CachedKey> for PerKeyExpiry {
    fn expire_after_create(&self, _kid: &String, value: &CachedKey, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }
}

impl JwksClient {
    /// Creates a new `JwksClient`. No request is made until the first lookup.
    pub fn new(http_client: reqwest::Client, jwks_uri: Url, default_cache_ttl: Duration) -> Self {
        let key_cache = Cache::builder()
            .max_capacity(100) // Apple publishes a handful of keys.
            .expire_after(PerKeyExpiry)
            .build();

        Self {
            inner: Arc::new(Inner {
                http_client,
                jwks_uri,
                default_cache_ttl,
                key_cache,
            }),
        }
    }

    /// Retrieves a decoding key for the given Key ID (`kid`).
    ///
    /// It first checks the in-memory cache. On a miss it fetches the whole key set,
    /// repopulates the cache, and looks the key up again.
    #[instrument(skip(self), err)]
    pub async fn get_key(&self, kid: &str) -> Result<Arc<DecodingKey>, NilaAppleError> {
        if let Some(cached) = self.inner.key_cache.get(kid).await {
            debug!("JWK cache hit for kid: {}", kid);
            return Ok(cached.key);
        }

        debug!("JWK cache miss for kid: {}. Fetching from Apple.", kid);
        self.fetch_and_cache_keys().await?;

        self.inner
            .key_cache
            .get(kid)
            .await
            .map(|cached| cached.key)
            .ok_or_else(|| NilaAppleError::KeyNotFound(kid.to_string()))
    }

    /// Fetches the JWKS and populates the cache. Returns the TTL applied.
    #[instrument(skip(self), err)]
    async fn fetch_and_cache_keys(&self) -> Result<Duration, NilaAppleError> {
        let response = self
            .inner
            .http_client
            .get(self.inner.jwks_uri.clone())
            .send()
            .await?
            .error_for_status()?;

        let cache_ttl = parse_cache_control(response.headers()).unwrap_or(self.inner.default_cache_ttl);

        let jwks: JsonWebKeySet = response
            .json()
            .await
            .map_err(|e| NilaAppleError::Protocol(format!("invalid JWKS document: {}", e)))?;

        debug!("Fetched {} keys. Caching with TTL: {:?}", jwks.keys.len(), cache_ttl);

        for jwk in jwks.keys {
            match decoding_key(&jwk) {
                Ok(key) => {
                    self.inner
                        .key_cache
                        .insert(jwk.kid, CachedKey { key: Arc::new(key), ttl: cache_ttl })
                        .await;
                }
                // One bad key must not take the others down with it.
                Err(e) => warn!(kid = %jwk.kid, "Skipping unusable JWK: {}", e),
            }
        }

        Ok(cache_ttl)
    }
}

fn decoding_key(jwk: &JsonWebKey) -> Result<DecodingKey, NilaAppleError> {
    match jwk.kty.as_str() {
        "RSA" => {
            let n = jwk.n.as_deref().ok_or_else(|| NilaAppleError::InvalidKeyFormat("RSA key missing 'n' component".to_string()))?;
            let e = jwk.e.as_deref().ok_or_else(|| NilaAppleError::InvalidKeyFormat("RSA key missing 'e' component".to_string()))?;
            Ok(DecodingKey::from_rsa_components(n, e)?)
        }
        "EC" => {
            let x = jwk.x.as_deref().ok_or_else(|| NilaAppleError::InvalidKeyFormat("EC key missing 'x' component".to_string()))?;
            let y = jwk.y.as_deref().ok_or_else(|| NilaAppleError::InvalidKeyFormat("EC key missing 'y' component".to_string()))?;
            Ok(DecodingKey::from_ec_components(x, y)?)
        }
        other => Err(NilaAppleError::InvalidKeyFormat(format!("unsupported key type '{}'", other))),
    }
}

/// Parses the `Cache-Control` header to determine the TTL.
fn parse_cache_control(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::CACHE_CONTROL)?
        .to_str()
        .ok()?
        .split(',')
        .find_map(|part| {
            part.trim()
                .strip_prefix("max-age=")?
                .parse::<u64>()
                .ok()
                .map(Duration::from_secs)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, CACHE_CONTROL};

    fn headers(value: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(CACHE_CONTROL, HeaderValue::from_str(value).unwrap());
        map
    }

    #[test]
    fn max_age_is_read_from_cache_control() {
        assert_eq!(
            parse_cache_control(&headers("public, max-age=3600, must-revalidate")),
            Some(Duration::from_secs(3600))
        );
        assert_eq!(parse_cache_control(&headers("no-cache")), None);
        assert_eq!(parse_cache_control(&headers("max-age=soon")), None);
        assert_eq!(parse_cache_control(&HeaderMap::new()), None);
    }

    #[test]
    fn unsupported_key_types_are_rejected() {
        let jwk = JsonWebKey {
            kid: "k".into(),
            kty: "oct".into(),
            use_purpose: None,
            alg: None,
            n: None,
            e: None,
            crv: None,
            x: None,
            y: None,
        };
        assert!(matches!(decoding_key(&jwk), Err(NilaAppleError::InvalidKeyFormat(_))));
    }

    #[test]
    fn rsa_key_without_modulus_is_rejected() {
        let jwk = JsonWebKey {
            kid: "k".into(),
            kty: "RSA".into(),
            use_purpose: Some("sig".into()),
            alg: Some("RS256".into()),
            n: None,
            e: Some("AQAB".into()),
            crv: None,
            x: None,
            y: None,
        };
        assert!(matches!(decoding_key(&jwk), Err(NilaAppleError::InvalidKeyFormat(_))));
    }
}
