use axum::{
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde_json::json;

use crate::config::ConfigError;

pub const SIGNIN_PATH: &str = "/api/auth/signin";
pub const ERROR_PATH: &str = "/api/auth/error";

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Template error: {0}")]
    Template(#[from] askama::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Not found")]
    NotFound,

    #[error("Method not allowed")]
    MethodNotAllowed,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("OAuth2 state mismatch")]
    StateMismatch,

    #[error("Missing OAuth2 authorization code")]
    MissingAuthCode,

    #[error("Failed to exchange code for token: {0}")]
    TokenExchange(String),

    #[error("Failed to fetch user profile: {0}")]
    ProfileFetch(String),

    #[error("Invalid OAuth2 provider: {0}")]
    InvalidProvider(String),

    #[error("Missing or invalid CSRF token")]
    MissingCsrf,

    #[error("Provider returned an error: {0}")]
    ProviderDenied(String),

    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

impl AuthError {
    /// Error code shown on the error page.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::StateMismatch
            | AuthError::MissingAuthCode
            | AuthError::TokenExchange(_)
            | AuthError::ProfileFetch(_) => "OAuthCallback",
            AuthError::ProviderDenied(error) if error == "access_denied" => "AccessDenied",
            AuthError::ProviderDenied(_) => "OAuthCallback",
            AuthError::InvalidProvider(_) => "OAuthSignin",
            AuthError::MissingCsrf => "Verification",
            AuthError::Token(_) => "Configuration",
        }
    }
}

/// Human-readable message for an error page code.
pub fn error_message(code: &str) -> &'static str {
    match code {
        "Configuration" => "There is a problem with the server configuration.",
        "AccessDenied" => "You do not have permission to sign in.",
        "OAuthSignin" => "Could not start sign in with this provider.",
        "OAuthCallback" => "Sign in with GitHub failed. Please try again.",
        "Verification" => "The sign in link is no longer valid.",
        _ => "Unable to sign in.",
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Auth(AuthError::MissingCsrf) => {
                tracing::warn!("Rejected request without a valid CSRF token");
                Redirect::to(&format!("{}?csrf=true", SIGNIN_PATH)).into_response()
            }

            AppError::Auth(auth_error) => {
                tracing::error!("Authentication error: {}", auth_error);
                let redirect_url = format!(
                    "{}?error={}",
                    ERROR_PATH,
                    urlencoding::encode(auth_error.code())
                );
                Redirect::to(&redirect_url).into_response()
            }

            AppError::NotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({
                    "error": "Not found",
                    "message": "Unknown authentication action."
                })),
            )
                .into_response(),

            AppError::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                Json(json!({
                    "error": "Method not allowed",
                    "message": "This action does not support the request method."
                })),
            )
                .into_response(),

            AppError::Template(ref template_error) => {
                tracing::error!("Template error: {}", template_error);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "error": "Template error",
                        "message": "A page rendering error occurred."
                    })),
                )
                    .into_response()
            }

            AppError::Config(ref config_error) => {
                tracing::error!("Configuration error: {}", config_error);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "error": "Configuration error",
                        "message": "Server configuration error."
                    })),
                )
                    .into_response()
            }
        }
    }
}
