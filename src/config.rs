// src/config.rs

use crate::error::NilaAppleError;
use jsonwebtoken::Algorithm;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Issuer of Apple ID Tokens and audience of the client secret.
pub const APPLE_ISSUER: &str = "https://appleid.apple.com";
/// Apple's token endpoint.
pub const APPLE_TOKEN_URL: &str = "https://appleid.apple.com/auth/token";
/// Apple's published signing keys.
pub const APPLE_JWKS_URL: &str = "https://appleid.apple.com/auth/keys";
/// Redirect URI registered for the Services ID. Must match byte for byte.
pub const DEFAULT_REDIRECT_URI: &str = "https://coach.cbhexp.com/api/security/apple/callback";

/// Default lifetime of the client secret: 30 days.
pub const DEFAULT_CLIENT_SECRET_TTL: Duration = Duration::from_secs(86_400 * 30);
/// Apple rejects client secrets valid for longer than six months.
pub const MAX_CLIENT_SECRET_TTL: Duration = Duration::from_secs(15_777_000);

/// Contains the validation settings for Apple ID Tokens.
#[derive(Clone, Debug)]
pub struct ValidationDetails {
    /// The signing algorithms that are permitted for the ID Token.
    /// Tokens signed with any other algorithm will be rejected.
    pub algorithms: Vec<Algorithm>,
    /// The tolerance for clock skew when validating `exp` and `iat`.
    /// Defaults to 60 seconds.
    pub leeway: Duration,
}

impl Default for ValidationDetails {
    fn default() -> Self {
        Self {
            // Apple signs ID Tokens with RS256.
            algorithms: vec![Algorithm::RS256],
            leeway: Duration::from_secs(60),
        }
    }
}

/// How the ID Token returned by the token endpoint is checked.
#[derive(Clone, Debug, PartialEq)]
pub enum IdTokenVerification {
    /// Verify the signature against Apple's JWKS, plus `iss`, `aud` and `exp`.
    Jwks {
        /// The JWKS endpoint.
        jwks_uri: Url,
        /// TTL for fetched keys when the response carries no `Cache-Control: max-age`.
        cache_ttl: Duration,
    },
    /// Decode the payload without any verification.
    Disabled,
}

/// The full runtime configuration of the callback server.
///
/// Build it with [`ConfigBuilder`] or load it from the process environment with
/// [`Config::from_env`]. The private key is redacted from the `Debug` output.
#[derive(Clone)]
pub struct Config {
    /// The Apple Developer Team ID, used as the client secret issuer.
    pub team_id: String,
    /// The identifier of the signing key, embedded in the client secret header.
    pub key_id: String,
    /// The Services ID (or App ID). Subject of the client secret, `client_id` of the
    /// token request and expected audience of the ID Token.
    pub client_id: String,
    /// PEM encoded PKCS#8 P-256 private key (`.p8` file contents).
    pub private_key: String,
    /// Redirect URI sent with the token request, exactly as registered with Apple.
    pub redirect_uri: String,
    /// The token endpoint.
    pub token_url: Url,
    /// Lifetime of generated client secrets.
    pub client_secret_ttl: Duration,
    /// Upper bound for each outbound HTTP request.
    pub http_timeout: Duration,
    /// ID Token validation parameters.
    pub validation: ValidationDetails,
    /// How ID Tokens are verified.
    pub verification: IdTokenVerification,
    /// Address the HTTP server binds to.
    pub listen_addr: String,
    /// Directory holding the landing page (`index.html`) and its assets.
    pub static_dir: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("team_id", &self.team_id)
            .field("key_id", &self.key_id)
            .field("client_id", &self.client_id)
            .field("private_key", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("token_url", &self.token_url.as_str())
            .field("client_secret_ttl", &self.client_secret_ttl)
            .field("http_timeout", &self.http_timeout)
            .field("validation", &self.validation)
            .field("verification", &self.verification)
            .field("listen_addr", &self.listen_addr)
            .field("static_dir", &self.static_dir)
            .finish()
    }
}

/// Turns the escaped form of a PEM key (`\n` written as two characters, as is common
/// in `.env` files and container secrets) back into real line breaks.
pub fn normalize_private_key(raw: &str) -> String {
    raw.replace("\\n", "\n").trim().to_string()
}

/// A builder for creating a `Config` instance.
#[derive(Default)]
pub struct ConfigBuilder {
    team_id: Option<String>,
    key_id: Option<String>,
    client_id: Option<String>,
    private_key: Option<String>,
    redirect_uri: Option<String>,
    token_url: Option<Url>,
    jwks_uri: Option<Url>,
    cache_ttl: Option<Duration>,
    client_secret_ttl: Option<Duration>,
    http_timeout: Option<Duration>,
    verify_id_token: Option<bool>,
    listen_addr: Option<String>,
    static_dir: Option<PathBuf>,
    validation: ValidationDetails,
}

impl ConfigBuilder {
    /// Creates a new `ConfigBuilder`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the Team ID. This is a required field.
    pub fn team_id(mut self, team_id: impl Into<String>) -> Self {
        self.team_id = Some(team_id.into());
        self
    }

    /// Sets the Key ID. This is a required field.
    pub fn key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    /// Sets the Services ID. This is a required field.
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets the PEM private key. Escaped `\n` sequences are normalized.
    /// This is a required field.
    pub fn private_key(mut self, pem: &str) -> Self {
        self.private_key = Some(normalize_private_key(pem));
        self
    }

    /// Reads the PEM private key from a `.p8` file.
    pub fn private_key_file(self, path: impl Into<PathBuf>) -> Result<Self, NilaAppleError> {
        let path = path.into();
        let pem = std::fs::read_to_string(&path).map_err(|e| {
            NilaAppleError::InvalidKeyFormat(format!(
                "Failed to read private key file from {:?}: {}",
                path, e
            ))
        })?;
        Ok(self.private_key(&pem))
    }

    /// Sets the redirect URI. It is validated as a URL but kept verbatim.
    pub fn redirect_uri(mut self, uri: &str) -> Result<Self, NilaAppleError> {
        Url::parse(uri).map_err(|e| NilaAppleError::InvalidUrl(format!("{}: {}", uri, e)))?;
        self.redirect_uri = Some(uri.to_string());
        Ok(self)
    }

    /// Overrides the token endpoint.
    pub fn token_url(mut self, url: &str) -> Result<Self, NilaAppleError> {
        let parsed_url = Url::parse(url).map_err(|e| NilaAppleError::InvalidUrl(e.to_string()))?;
        self.token_url = Some(parsed_url);
        Ok(self)
    }

    /// Overrides the JWKS endpoint.
    pub fn jwks_uri(mut self, url: &str) -> Result<Self, NilaAppleError> {
        let parsed_url = Url::parse(url).map_err(|e| NilaAppleError::InvalidUrl(e.to_string()))?;
        self.jwks_uri = Some(parsed_url);
        Ok(self)
    }

    /// Sets the fallback cache TTL for the JWKS.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Sets the client secret lifetime. Must be within (0, 6 months].
    pub fn client_secret_ttl(mut self, ttl: Duration) -> Self {
        self.client_secret_ttl = Some(ttl);
        self
    }

    /// Sets the timeout applied to every outbound request.
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = Some(timeout);
        self
    }

    /// Enables or disables ID Token verification. Enabled by default.
    pub fn verify_id_token(mut self, verify: bool) -> Self {
        self.verify_id_token = Some(verify);
        self
    }

    /// Sets the allowed ID Token signing algorithms.
    pub fn algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.validation.algorithms = algorithms;
        self
    }

    /// Sets the clock skew tolerance for ID Token validation.
    pub fn leeway(mut self, leeway: Duration) -> Self {
        self.validation.leeway = leeway;
        self
    }

    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = Some(addr.into());
        self
    }

    pub fn static_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.static_dir = Some(dir.into());
        self
    }

    /// Consumes the builder and returns a `Config` object.
    ///
    /// # Errors
    ///
    /// Returns an error if a required field is missing or empty, or if the
    /// client secret lifetime is outside what Apple accepts.
    pub fn build(self) -> Result<Config, NilaAppleError> {
        let team_id = required("team_id", self.team_id)?;
        let key_id = required("key_id", self.key_id)?;
        let client_id = required("client_id", self.client_id)?;
        let private_key = required("private_key", self.private_key)?;

        let client_secret_ttl = self.client_secret_ttl.unwrap_or(DEFAULT_CLIENT_SECRET_TTL);
        if client_secret_ttl.is_zero() || client_secret_ttl > MAX_CLIENT_SECRET_TTL {
            return Err(NilaAppleError::Configuration(format!(
                "client secret TTL must be between 1 and {} seconds, got {}",
                MAX_CLIENT_SECRET_TTL.as_secs(),
                client_secret_ttl.as_secs()
            )));
        }

        let http_timeout = self.http_timeout.unwrap_or(Duration::from_secs(10));
        if http_timeout.is_zero() {
            return Err(NilaAppleError::Configuration(
                "HTTP timeout must be greater than zero".to_string(),
            ));
        }

        let token_url = match self.token_url {
            Some(url) => url,
            None => Url::parse(APPLE_TOKEN_URL).map_err(|e| NilaAppleError::InvalidUrl(e.to_string()))?,
        };

        let verification = if self.verify_id_token.unwrap_or(true) {
            let jwks_uri = match self.jwks_uri {
                Some(url) => url,
                None => Url::parse(APPLE_JWKS_URL).map_err(|e| NilaAppleError::InvalidUrl(e.to_string()))?,
            };
            IdTokenVerification::Jwks {
                jwks_uri,
                cache_ttl: self.cache_ttl.unwrap_or_else(|| Duration::from_secs(24 * 60 * 60)),
            }
        } else {
            IdTokenVerification::Disabled
        };

        Ok(Config {
            team_id,
            key_id,
            client_id,
            private_key,
            redirect_uri: self.redirect_uri.unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string()),
            token_url,
            client_secret_ttl,
            http_timeout,
            validation: self.validation,
            verification,
            listen_addr: self.listen_addr.unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            static_dir: self.static_dir.unwrap_or_else(|| PathBuf::from("public")),
        })
    }
}

fn required(field: &str, value: Option<String>) -> Result<String, NilaAppleError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| NilaAppleError::MissingConfiguration(field.to_string()))
}

impl Config {
    /// Loads the configuration from the process environment.
    ///
    /// # Required
    /// - `APPLE_TEAM_ID`, `APPLE_KEY_ID`, `APPLE_CLIENT_ID`
    /// - `APPLE_PRIVATE_KEY` or `APPLE_PRIVATE_KEY_PATH`
    ///
    /// # Optional
    /// - `APPLE_REDIRECT_URI`, `APPLE_TOKEN_URL`, `APPLE_JWKS_URL`
    /// - `APPLE_CLIENT_SECRET_TTL_SECS` (default: 30 days)
    /// - `APPLE_VERIFY_ID_TOKEN` (default: `true`)
    /// - `HTTP_TIMEOUT_SECS` (default: `10`)
    /// - `LISTEN_ADDR` (default: `"0.0.0.0:3000"`), `STATIC_DIR` (default: `"public"`)
    pub fn from_env() -> Result<Self, NilaAppleError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, NilaAppleError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let mut builder = ConfigBuilder::new();
        if let Some(v) = var("APPLE_TEAM_ID") {
            builder = builder.team_id(v);
        }
        if let Some(v) = var("APPLE_KEY_ID") {
            builder = builder.key_id(v);
        }
        if let Some(v) = var("APPLE_CLIENT_ID") {
            builder = builder.client_id(v);
        }

        builder = match (var("APPLE_PRIVATE_KEY"), var("APPLE_PRIVATE_KEY_PATH")) {
            (Some(pem), _) => builder.private_key(&pem),
            (None, Some(path)) => builder.private_key_file(path)?,
            (None, None) => builder,
        };

        if let Some(v) = var("APPLE_REDIRECT_URI") {
            builder = builder.redirect_uri(&v)?;
        }
        if let Some(v) = var("APPLE_TOKEN_URL") {
            builder = builder.token_url(&v)?;
        }
        if let Some(v) = var("APPLE_JWKS_URL") {
            builder = builder.jwks_uri(&v)?;
        }
        if let Some(v) = var("APPLE_CLIENT_SECRET_TTL_SECS") {
            builder = builder.client_secret_ttl(Duration::from_secs(parse_number(
                "APPLE_CLIENT_SECRET_TTL_SECS",
                &v,
            )?));
        }
        if let Some(v) = var("HTTP_TIMEOUT_SECS") {
            builder = builder.http_timeout(Duration::from_secs(parse_number("HTTP_TIMEOUT_SECS", &v)?));
        }
        if let Some(v) = var("APPLE_VERIFY_ID_TOKEN") {
            builder = builder.verify_id_token(parse_bool("APPLE_VERIFY_ID_TOKEN", &v)?);
        }
        if let Some(v) = var("LISTEN_ADDR") {
            builder = builder.listen_addr(v);
        }
        if let Some(v) = var("STATIC_DIR") {
            builder = builder.static_dir(v);
        }

        builder.build()
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, NilaAppleError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| NilaAppleError::Configuration(format!("{} must be a valid integer", key)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, NilaAppleError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(NilaAppleError::Configuration(format!("{} must be a boolean", key))),
    }
}
