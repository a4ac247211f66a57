// src/validator/model.rs

use serde::de::{self, Unexpected};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Placeholder rendered when the ID Token carries no email.
pub const EMAIL_NOT_PROVIDED: &str = "Not provided";

/// Represents a single JSON Web Key (JWK) as defined in RFC 7517.
#[derive(Debug, Deserialize)]
pub struct JsonWebKey {
    pub kid: String,
    pub kty: String,
    #[serde(rename = "use")]
    pub use_purpose: Option<String>,
    pub alg: Option<String>,
    // RSA
    pub n: Option<String>,
    pub e: Option<String>,
    // EC
    pub crv: Option<String>,
    pub x: Option<String>,
    pub y: Option<String>,
}

/// Represents a JSON Web Key Set (JWKS), which is a collection of JWKs.
#[derive(Debug, Deserialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<JsonWebKey>,
}

/// The claims of an Apple ID Token.
///
/// `sub` is always present. `email` is only sent on the first consent (or when
/// the user keeps sharing it), so callers must not rely on it. Every other claim
/// is kept in `extra` so the full claim set can be shown.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentityClaims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Apple sends this either as a JSON boolean or as `"true"`/`"false"`.
    #[serde(default, deserialize_with = "lenient_bool", skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(default, deserialize_with = "lenient_bool", skip_serializing_if = "Option::is_none")]
    pub is_private_email: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IdentityClaims {
    /// The email, or [`EMAIL_NOT_PROVIDED`].
    pub fn email_or_placeholder(&self) -> &str {
        self.email.as_deref().unwrap_or(EMAIL_NOT_PROVIDED)
    }
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        String(String),
    }

    match Option::<BoolOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(BoolOrString::Bool(b)) => Ok(Some(b)),
        Some(BoolOrString::String(s)) => match s.as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            other => Err(de::Error::invalid_value(Unexpected::Str(other), &"a boolean")),
        },
    }
}
