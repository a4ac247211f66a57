// src/exchange.rs

use crate::config::Config;
use crate::error::NilaAppleError;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Success payload of Apple's token endpoint.
///
/// Only `id_token` is consumed here; the other tokens are received and dropped.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub id_token: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Error payload of Apple's token endpoint, e.g. `{"error":"invalid_grant"}`.
#[derive(Debug, Deserialize, PartialEq)]
pub struct ProviderError {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl ProviderError {
    /// Parses a provider error body, if it has the standard OAuth shape.
    pub fn parse(body: &str) -> Option<Self> {
        serde_json::from_str(body).ok()
    }
}

/// Builds the HTTP client shared by the token exchange and the JWKS fetches.
///
/// Every request is bounded by `timeout`; a request that is still running when the
/// inbound request is dropped is cancelled with it.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, NilaAppleError> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(5)))
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Exchanges authorization codes at Apple's token endpoint.
#[derive(Clone)]
pub struct TokenExchangeClient {
    http_client: reqwest::Client,
    token_url: Url,
    client_id: String,
    redirect_uri: String,
}

impl TokenExchangeClient {
    pub fn new(config: &Config, http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            redirect_uri: config.redirect_uri.clone(),
        }
    }

    /// Exchanges `code` for tokens, authenticating with `client_secret`.
    ///
    /// A single attempt is made: authorization codes are single-use, so a retry could
    /// never succeed where the first call failed.
    ///
    /// # Errors
    ///
    /// - `BadRequest` if `code` is empty (no request is sent)
    /// - `Network` on transport failure or timeout
    /// - `ExchangeRejected` on a non-2xx status, carrying Apple's body for logging
    /// - `Protocol` when a 2xx body is not a token response with an `id_token`
    #[instrument(skip(self, code, client_secret), fields(token_url = %self.token_url), err)]
    pub async fn exchange(&self, code: &str, client_secret: &str) -> Result<TokenResponse, NilaAppleError> {
        if code.trim().is_empty() {
            return Err(NilaAppleError::BadRequest("authorization code is empty".to_string()));
        }

        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", client_secret),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];

        let response = self
            .http_client
            .post(self.token_url.clone())
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(NilaAppleError::ExchangeRejected { status, body });
        }

        let tokens: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| NilaAppleError::Protocol(format!("unexpected token response: {}", e)))?;

        if tokens.id_token.trim().is_empty() {
            return Err(NilaAppleError::Protocol("token response has an empty id_token".to_string()));
        }

        debug!(
            has_access_token = tokens.access_token.is_some(),
            has_refresh_token = tokens.refresh_token.is_some(),
            "Token exchange succeeded."
        );
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_is_parsed_when_well_formed() {
        assert_eq!(
            ProviderError::parse(r#"{"error":"invalid_client","error_description":"bad secret"}"#),
            Some(ProviderError {
                error: "invalid_client".into(),
                error_description: Some("bad secret".into()),
            })
        );
        assert_eq!(ProviderError::parse("<html>bad gateway</html>"), None);
    }

    #[test]
    fn token_response_requires_id_token() {
        assert!(serde_json::from_str::<TokenResponse>(r#"{"access_token":"a"}"#).is_err());
        let tokens: TokenResponse =
            serde_json::from_str(r#"{"id_token":"a.b.c","token_type":"Bearer","expires_in":3600}"#).unwrap();
        assert_eq!(tokens.id_token, "a.b.c");
        assert_eq!(tokens.expires_in, Some(3600));
    }
}
