// src/handler.rs

use crate::config::Config;
use crate::error::NilaAppleError;
use crate::exchange::{build_http_client, ProviderError, TokenExchangeClient};
use crate::generator::{ClientSecretGenerator, GeneratorConfig};
use crate::validator::model::IdentityClaims;
use crate::validator::Validator;
use axum::extract::rejection::FormRejection;
use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

/// Body returned with every 400.
pub const BAD_REQUEST_BODY: &str = "Error: No authorization code received.";
/// Body returned with every 500. Provider details are never echoed.
pub const SERVER_ERROR_BODY: &str = "An error occurred during authentication.";

/// Shared, immutable state handed to every request.
#[derive(Clone)]
pub struct AppState {
    pub generator: Arc<ClientSecretGenerator>,
    pub exchange: TokenExchangeClient,
    pub validator: Validator,
}

impl AppState {
    /// Wires the pipeline from an explicit configuration.
    ///
    /// Fails on a bad signing key, so a misdeployment stops the process at startup.
    pub fn new(config: &Config) -> Result<Self, NilaAppleError> {
        let generator = ClientSecretGenerator::new(GeneratorConfig::from(config))?;
        let http_client = build_http_client(config.http_timeout)?;
        Ok(Self {
            generator: Arc::new(generator),
            exchange: TokenExchangeClient::new(config, http_client.clone()),
            validator: Validator::new(config, http_client),
        })
    }
}

/// Fields Apple posts to the redirect URI in `form_post` response mode.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackForm {
    pub code: Option<String>,
    pub state: Option<String>,
    /// JSON with the user's name and email, sent on the first consent only.
    pub user: Option<String>,
}

/// `POST /api/security/apple/callback`
pub async fn apple_callback(
    State(state): State<AppState>,
    form: Result<Form<CallbackForm>, FormRejection>,
) -> Response {
    let span = tracing::info_span!("apple_callback", request_id = %Uuid::new_v4());

    async move {
        // An unreadable body is treated the same as a body without a code.
        let form = match form {
            Ok(Form(form)) => form,
            Err(rejection) => {
                warn!("Unreadable callback body: {}", rejection);
                CallbackForm::default()
            }
        };

        match complete_sign_in(&state, form).await {
            Ok(claims) => match render_success(&claims) {
                Ok(page) => Html(page).into_response(),
                Err(err) => failure_response(err),
            },
            Err(err) => failure_response(err),
        }
    }
    .instrument(span)
    .await
}

/// Runs the sign-in pipeline: check the code, mint the client secret, exchange
/// the code, read the ID Token. The first failing step ends the request.
pub async fn complete_sign_in(state: &AppState, form: CallbackForm) -> Result<IdentityClaims, NilaAppleError> {
    let code = form
        .code
        .filter(|code| !code.trim().is_empty())
        .ok_or_else(|| NilaAppleError::BadRequest("no authorization code received".to_string()))?;

    info!(
        has_state = form.state.is_some(),
        first_consent = form.user.is_some(),
        "Authorization code received from Apple."
    );

    let client_secret = state.generator.issue()?;
    let tokens = state.exchange.exchange(&code, &client_secret).await?;
    let claims = state.validator.validate(&tokens.id_token).await?;

    // TODO: look up or create the local user keyed by `claims.sub`, then open a session.
    info!(sub = %claims.sub, has_email = claims.email.is_some(), "Apple sign-in completed.");
    Ok(claims)
}

/// Renders the success page: email (or placeholder), subject and the full claim set.
pub fn render_success(claims: &IdentityClaims) -> Result<String, NilaAppleError> {
    let all_claims = serde_json::to_string_pretty(claims)
        .map_err(|e| NilaAppleError::Decode(format!("claims are not serializable: {}", e)))?;

    Ok(format!(
        "\n<h1>Apple Login Successful!</h1>\n<p>Email: {}</p>\n<p>Apple Unique ID: {}</p>\n<pre>{}</pre>\n",
        escape_html(claims.email_or_placeholder()),
        escape_html(&claims.sub),
        escape_html(&all_claims),
    ))
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

fn failure_response(err: NilaAppleError) -> Response {
    log_failure(&err);
    err.into_response()
}

/// Logs a failed sign-in. Apple's error payload goes to the log and nowhere else.
fn log_failure(err: &NilaAppleError) {
    let kind = err.kind();
    match err {
        NilaAppleError::BadRequest(reason) => {
            warn!(kind, "Rejecting callback: {}", reason);
        }
        NilaAppleError::ExchangeRejected { status, body } => match ProviderError::parse(body) {
            Some(provider) => error!(
                kind,
                %status,
                provider_error = %provider.error,
                provider_error_description = provider.error_description.as_deref().unwrap_or(""),
                "Apple rejected the token request."
            ),
            None => error!(kind, %status, provider_body = %body, "Apple rejected the token request."),
        },
        _ if kind == "configuration" => {
            error!(kind, error = %err, "Sign in with Apple is misconfigured.");
        }
        _ => {
            error!(kind, error = %err, "Error during Apple authentication.");
        }
    }
}

impl IntoResponse for NilaAppleError {
    fn into_response(self) -> Response {
        if self.is_client_error() {
            (StatusCode::BAD_REQUEST, BAD_REQUEST_BODY).into_response()
        } else {
            (StatusCode::INTERNAL_SERVER_ERROR, SERVER_ERROR_BODY).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use serde_json::json;

    async fn read_body(resp: Response) -> (StatusCode, String) {
        let status = resp.status();
        let bytes = Body::new(resp.into_body())
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn bad_request_maps_to_400() {
        let (status, body) = read_body(NilaAppleError::BadRequest("x".into()).into_response()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, BAD_REQUEST_BODY);
    }

    #[tokio::test]
    async fn rejected_exchange_maps_to_opaque_500() {
        let err = NilaAppleError::ExchangeRejected {
            status: reqwest::StatusCode::BAD_REQUEST,
            body: r#"{"error":"invalid_grant"}"#.into(),
        };
        let (status, body) = read_body(err.into_response()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, SERVER_ERROR_BODY);
    }

    #[tokio::test]
    async fn configuration_and_decode_errors_map_to_500() {
        for err in [
            NilaAppleError::InvalidKeyFormat("x".into()),
            NilaAppleError::Decode("x".into()),
            NilaAppleError::Protocol("x".into()),
        ] {
            let (status, _) = read_body(err.into_response()).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    #[test]
    fn rendered_page_escapes_claim_values() {
        let claims: IdentityClaims = serde_json::from_value(json!({
            "sub": "001.abc",
            "email": "<script>alert(1)</script>@example.com"
        }))
        .unwrap();
        let page = render_success(&claims).unwrap();
        assert!(!page.contains("<script>"));
        assert!(page.contains("&lt;script&gt;"));
        assert!(page.contains("Apple Unique ID: 001.abc"));
    }

    #[test]
    fn rendered_page_uses_placeholder_without_email() {
        let claims: IdentityClaims = serde_json::from_value(json!({ "sub": "001.abc" })).unwrap();
        let page = render_success(&claims).unwrap();
        assert!(page.contains("<p>Email: Not provided</p>"));
        assert!(page.contains("&quot;sub&quot;: &quot;001.abc&quot;"));
    }
}
