// src/lib.rs

pub mod client;
pub mod config;
pub mod error;
pub mod exchange;
pub mod generator;
pub mod handler;
pub mod server;
pub mod validator;

/// The public prelude for the `nila-apple-auth` crate.
///
/// This module re-exports the most commonly used types for convenience.
pub mod prelude {
    pub use crate::config::{Config, ConfigBuilder, IdTokenVerification};
    pub use crate::error::NilaAppleError;
    pub use crate::exchange::{TokenExchangeClient, TokenResponse};
    pub use crate::generator::{ClientSecretGenerator, GeneratorConfig};
    pub use crate::handler::AppState;
    pub use crate::server::{router, serve, CALLBACK_PATH};
    pub use crate::validator::model::IdentityClaims;
    pub use crate::validator::{decode_unverified, Validator};
    pub use jsonwebtoken::Algorithm;
}
