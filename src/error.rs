// src/error.rs

use base64::DecodeError;
use jsonwebtoken::Algorithm;
use reqwest::StatusCode;
use thiserror::Error;

/// The primary error type for the `nila-apple-auth` crate.
#[derive(Debug, Error)]
pub enum NilaAppleError {
    /// The inbound callback request is missing required input.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A required configuration field is missing.
    #[error("A required configuration field is missing: {0}")]
    MissingConfiguration(String),

    /// A configuration value is invalid.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// A provided URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The signing key (or a JWK served by Apple) is malformed.
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// Signing the client secret failed.
    #[error("Client secret generation failed: {0}")]
    TokenGeneration(String),

    /// The outbound HTTP call failed before a response was received (DNS, TLS, timeout...).
    #[error("HTTP request error: {0}")]
    Network(#[from] reqwest::Error),

    /// Apple answered the token request with a non-success status.
    /// `body` is kept for logging only and must never be sent back to the caller.
    #[error("Token exchange rejected by provider with status {status}")]
    ExchangeRejected { status: StatusCode, body: String },

    /// Apple answered with a success status but the payload is not what the protocol requires.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The ID Token is not a well-formed compact JWT.
    #[error("Malformed ID Token: {0}")]
    Decode(String),

    /// An error occurred while decoding a Base64URL encoded segment.
    #[error("Base64URL decoding error: {0}")]
    Base64Decode(#[from] DecodeError),

    /// Signature or claim validation of the ID Token failed.
    #[error("ID Token validation error: {0}")]
    InvalidIdToken(#[from] jsonwebtoken::errors::Error),

    /// The JWT header is missing the required 'kid' (Key ID) field.
    #[error("The JWT header is missing the 'kid' (Key ID) field")]
    MissingKeyId,

    /// A key with the specified 'kid' was not found in Apple's key set.
    #[error("Key not found for kid: {0}")]
    KeyNotFound(String),

    /// The algorithm specified in the JWT header is not allowed by the configuration.
    #[error("Unsupported algorithm: {0:?}")]
    UnsupportedAlgorithm(Algorithm),
}

impl NilaAppleError {
    /// A short, stable label used as the `kind` field in logs.
    ///
    /// Misdeployment (`configuration`) is kept apart from runtime failures.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::MissingConfiguration(_)
            | Self::Configuration(_)
            | Self::InvalidUrl(_)
            | Self::InvalidKeyFormat(_)
            | Self::TokenGeneration(_) => "configuration",
            Self::Network(_) | Self::ExchangeRejected { .. } | Self::Protocol(_) => "exchange",
            Self::Decode(_)
            | Self::Base64Decode(_)
            | Self::InvalidIdToken(_)
            | Self::MissingKeyId
            | Self::KeyNotFound(_)
            | Self::UnsupportedAlgorithm(_) => "identity_token",
        }
    }

    /// Whether the failure was caused by the caller rather than by this service or Apple.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::BadRequest(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_separate_configuration_from_runtime_failures() {
        assert_eq!(NilaAppleError::Configuration("x".into()).kind(), "configuration");
        assert_eq!(NilaAppleError::TokenGeneration("x".into()).kind(), "configuration");
        assert_eq!(NilaAppleError::Protocol("x".into()).kind(), "exchange");
        assert_eq!(
            NilaAppleError::ExchangeRejected {
                status: StatusCode::BAD_REQUEST,
                body: "{}".into()
            }
            .kind(),
            "exchange"
        );
        assert_eq!(NilaAppleError::Decode("x".into()).kind(), "identity_token");
        assert_eq!(NilaAppleError::MissingKeyId.kind(), "identity_token");
    }

    #[test]
    fn only_bad_request_is_a_client_error() {
        assert!(NilaAppleError::BadRequest("code".into()).is_client_error());
        assert!(!NilaAppleError::Decode("x".into()).is_client_error());
        assert!(!NilaAppleError::MissingConfiguration("team_id".into()).is_client_error());
    }

    #[test]
    fn rejected_display_does_not_include_provider_body() {
        let err = NilaAppleError::ExchangeRejected {
            status: StatusCode::BAD_REQUEST,
            body: r#"{"error":"invalid_grant"}"#.into(),
        };
        assert!(!err.to_string().contains("invalid_grant"));
    }
}
