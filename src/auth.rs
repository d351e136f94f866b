use std::time::Duration;

use oauth2::{
    basic::BasicClient, AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    RedirectUrl, Scope, TokenResponse, TokenUrl,
};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};

use crate::{
    config::{Config, ConfigError},
    error::{AppError, AuthError},
    models::{ProviderProfile, SessionUser},
};

const USER_AGENT: &str = "github-dashboard";

/// Endpoints the GitHub provider talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub api_base_url: String,
}

impl Default for GitHubEndpoints {
    fn default() -> Self {
        Self {
            authorize_url: "https://github.com/login/oauth/authorize".to_string(),
            token_url: "https://github.com/login/oauth/access_token".to_string(),
            api_base_url: "https://api.github.com".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GitHubProvider {
    pub client_id: String,
    pub client_secret: String,
    pub endpoints: GitHubEndpoints,
}

impl GitHubProvider {
    pub const ID: &'static str = "github";
    pub const NAME: &'static str = "GitHub";
    pub const SCOPES: [&'static str; 2] = ["read:user", "user:email"];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Lifetime of an issued session token.
    pub max_age: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(60),
        }
    }
}

/// Everything the auth routes need: the provider, the signing secret and
/// the session strategy (stateless signed token).
#[derive(Debug, Clone)]
pub struct AuthOptions {
    pub provider: GitHubProvider,
    pub secret: String,
    pub base_url: String,
    pub secure_cookies: bool,
    pub session: SessionOptions,
}

impl AuthOptions {
    pub fn new(config: &Config) -> Self {
        Self {
            provider: GitHubProvider {
                client_id: config.github_client_id.clone(),
                client_secret: config.github_client_secret.clone(),
                endpoints: GitHubEndpoints::default(),
            },
            secret: config.nextauth_secret.clone(),
            base_url: config.base_url.clone(),
            secure_cookies: config.uses_https(),
            session: SessionOptions::default(),
        }
    }

    pub fn with_endpoints(mut self, endpoints: GitHubEndpoints) -> Self {
        self.provider.endpoints = endpoints;
        self
    }

    pub fn callback_url(&self) -> String {
        format!("{}/api/auth/callback/{}", self.base_url, GitHubProvider::ID)
    }

    pub fn signin_url(&self) -> String {
        format!("{}/api/auth/signin/{}", self.base_url, GitHubProvider::ID)
    }
}

/// Entry of the `GET /api/auth/providers` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub id: &'static str,
    pub name: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub signin_url: String,
    pub callback_url: String,
}

#[derive(Debug, Clone)]
pub struct AuthService {
    client: BasicClient,
    http_client: HttpClient,
    api_base_url: String,
}

impl AuthService {
    pub fn new(options: &AuthOptions) -> Result<Self, AppError> {
        let provider = &options.provider;

        let client = BasicClient::new(
            ClientId::new(provider.client_id.clone()),
            Some(ClientSecret::new(provider.client_secret.clone())),
            AuthUrl::new(provider.endpoints.authorize_url.clone())
                .map_err(|_| ConfigError::InvalidUrl("GitHub authorize URL"))?,
            Some(
                TokenUrl::new(provider.endpoints.token_url.clone())
                    .map_err(|_| ConfigError::InvalidUrl("GitHub token URL"))?,
            ),
        )
        .set_auth_type(AuthType::RequestBody)
        .set_redirect_uri(
            RedirectUrl::new(options.callback_url())
                .map_err(|_| ConfigError::InvalidUrl("NEXTAUTH_URL"))?,
        );

        Ok(Self {
            client,
            http_client: HttpClient::new(),
            api_base_url: provider.endpoints.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn provider_info(options: &AuthOptions) -> ProviderInfo {
        ProviderInfo {
            id: GitHubProvider::ID,
            name: GitHubProvider::NAME,
            kind: "oauth",
            signin_url: options.signin_url(),
            callback_url: options.callback_url(),
        }
    }

    /// Authorization URL for GitHub plus the state value the callback must echo.
    pub fn authorize_url(&self) -> (String, CsrfToken) {
        let (auth_url, csrf_token) = self
            .client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(GitHubProvider::SCOPES.map(|scope| Scope::new(scope.to_string())))
            .url();

        (auth_url.to_string(), csrf_token)
    }

    pub async fn handle_callback(
        &self,
        code: String,
        state: &str,
        expected_state: &str,
    ) -> Result<ProviderProfile, AuthError> {
        if state != expected_state {
            return Err(AuthError::StateMismatch);
        }

        let token_result = self
            .client
            .exchange_code(AuthorizationCode::new(code))
            .request_async(oauth2::reqwest::async_http_client)
            .await
            .map_err(|e| AuthError::TokenExchange(e.to_string()))?;

        self.fetch_profile(token_result.access_token().secret()).await
    }

    pub async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, AuthError> {
        let profile_response = self
            .http_client
            .get(format!("{}/user", self.api_base_url))
            .bearer_auth(access_token)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(|e| AuthError::ProfileFetch(e.to_string()))?;

        if !profile_response.status().is_success() {
            return Err(AuthError::ProfileFetch(format!(
                "HTTP {}",
                profile_response.status()
            )));
        }

        let mut profile: GitHubUserProfile = profile_response
            .json()
            .await
            .map_err(|e| AuthError::ProfileFetch(e.to_string()))?;

        // Private emails are only listed by the emails endpoint
        if profile.email.is_none() {
            profile.email = self.fetch_primary_email(access_token).await?;
        }

        Ok(profile.into())
    }

    async fn fetch_primary_email(&self, access_token: &str) -> Result<Option<String>, AuthError> {
        let emails_response = self
            .http_client
            .get(format!("{}/user/emails", self.api_base_url))
            .bearer_auth(access_token)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(|e| AuthError::ProfileFetch(e.to_string()))?;

        if !emails_response.status().is_success() {
            tracing::debug!("GitHub emails endpoint returned {}", emails_response.status());
            return Ok(None);
        }

        let emails: Vec<GitHubEmail> = emails_response
            .json()
            .await
            .map_err(|e| AuthError::ProfileFetch(e.to_string()))?;

        Ok(emails
            .into_iter()
            .find(|email| email.primary && email.verified)
            .map(|email| email.email))
    }
}

// GitHub API user profile response
#[derive(Debug, Deserialize)]
pub struct GitHubUserProfile {
    pub id: u64,
    pub login: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

impl From<GitHubUserProfile> for ProviderProfile {
    fn from(profile: GitHubUserProfile) -> Self {
        ProviderProfile {
            id: profile.id.to_string(),
            user: SessionUser {
                name: profile.name.or(Some(profile.login)),
                email: profile.email,
                image: profile.avatar_url,
            },
        }
    }
}

// GitHub API email response
#[derive(Debug, Deserialize)]
pub struct GitHubEmail {
    pub email: String,
    pub primary: bool,
    pub verified: bool,
}
