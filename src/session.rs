use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::{
    auth::AuthOptions,
    error::AuthError,
    models::{ProviderProfile, SessionClaims},
};

// Cookie names
pub const SESSION_COOKIE: &str = "auth.session-token";
pub const CSRF_COOKIE: &str = "auth.csrf-token";
pub const STATE_COOKIE: &str = "auth.state";
pub const CALLBACK_URL_COOKIE: &str = "auth.callback-url";

const STATE_MAX_AGE_SECS: i64 = 15 * 60;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize, Deserialize)]
struct StateClaims {
    state: String,
    exp: i64,
}

/// Issues and verifies the signed tokens held by the browser: the session
/// token, the OAuth state and the CSRF double-submit token. Nothing is kept
/// server side.
#[derive(Clone)]
pub struct SessionManager {
    secret: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    max_age_secs: i64,
    secure: bool,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("max_age_secs", &self.max_age_secs)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(options: &AuthOptions) -> Self {
        Self {
            secret: options.secret.clone(),
            encoding_key: EncodingKey::from_secret(options.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(options.secret.as_bytes()),
            max_age_secs: i64::try_from(options.session.max_age.as_secs()).unwrap_or(i64::MAX),
            secure: options.secure_cookies,
        }
    }

    pub fn max_age_secs(&self) -> i64 {
        self.max_age_secs
    }

    fn validation(required: &[&str]) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(required);
        validation
    }

    /// Signs a fresh session token for a provider profile.
    pub fn issue(&self, profile: &ProviderProfile) -> Result<(String, SessionClaims), AuthError> {
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            sub: profile.id.clone(),
            name: profile.user.name.clone(),
            email: profile.user.email.clone(),
            picture: profile.user.image.clone(),
            iat: now,
            exp: now.saturating_add(self.max_age_secs),
            jti: Uuid::new_v4().to_string(),
        };

        Ok((self.sign(&claims)?, claims))
    }

    /// Re-signs existing claims with a new expiry.
    pub fn refresh(&self, claims: &SessionClaims) -> Result<(String, SessionClaims), AuthError> {
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            iat: now,
            exp: now.saturating_add(self.max_age_secs),
            jti: Uuid::new_v4().to_string(),
            ..claims.clone()
        };

        Ok((self.sign(&claims)?, claims))
    }

    pub fn sign(&self, claims: &SessionClaims) -> Result<String, AuthError> {
        Ok(encode(&Header::default(), claims, &self.encoding_key)?)
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims, AuthError> {
        let data = decode::<SessionClaims>(
            token,
            &self.decoding_key,
            &Self::validation(&["exp", "sub"]),
        )?;

        Ok(data.claims)
    }

    /// Reads the session from the request cookies. Missing, expired and
    /// tampered tokens all mean "no session".
    pub fn session_from_jar(&self, jar: &CookieJar) -> Option<SessionClaims> {
        let token = jar.get(SESSION_COOKIE)?;

        match self.verify(token.value()) {
            Ok(claims) => Some(claims),
            Err(e) => {
                tracing::debug!("Ignoring session token: {}", e);
                None
            }
        }
    }

    pub fn session_cookie(&self, token: String) -> Cookie<'static> {
        self.cookie(SESSION_COOKIE, token, Some(self.max_age_secs))
    }

    pub fn state_cookie(&self, state: &str) -> Result<Cookie<'static>, AuthError> {
        let claims = StateClaims {
            state: state.to_string(),
            exp: Utc::now().timestamp() + STATE_MAX_AGE_SECS,
        };
        let token = encode(&Header::default(), &claims, &self.encoding_key)?;

        Ok(self.cookie(STATE_COOKIE, token, Some(STATE_MAX_AGE_SECS)))
    }

    /// The OAuth state stored when sign-in started.
    pub fn state_from_jar(&self, jar: &CookieJar) -> Result<String, AuthError> {
        let cookie = jar.get(STATE_COOKIE).ok_or(AuthError::StateMismatch)?;
        let data = decode::<StateClaims>(
            cookie.value(),
            &self.decoding_key,
            &Self::validation(&["exp"]),
        )
        .map_err(|e| {
            tracing::warn!("Rejected OAuth state cookie: {}", e);
            AuthError::StateMismatch
        })?;

        Ok(data.claims.state)
    }

    pub fn callback_url_cookie(&self, url: String) -> Cookie<'static> {
        self.cookie(CALLBACK_URL_COOKIE, url, Some(STATE_MAX_AGE_SECS))
    }

    /// Returns the CSRF token from a valid cookie, or issues a new one and
    /// adds its cookie to the jar.
    pub fn ensure_csrf(&self, jar: CookieJar) -> (CookieJar, String) {
        if let Some(token) = self.csrf_from_jar(&jar) {
            return (jar, token);
        }

        let mut bytes = [0_u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = general_purpose::URL_SAFE_NO_PAD.encode(bytes);
        let value = format!("{}.{}", token, self.csrf_signature(&token));

        (jar.add(self.cookie(CSRF_COOKIE, value, None)), token)
    }

    /// Checks a submitted form token against the CSRF cookie.
    pub fn verify_csrf(&self, jar: &CookieJar, submitted: Option<&str>) -> Result<(), AuthError> {
        match (self.csrf_from_jar(jar), submitted) {
            (Some(expected), Some(submitted)) if expected == submitted => Ok(()),
            _ => Err(AuthError::MissingCsrf),
        }
    }

    fn csrf_from_jar(&self, jar: &CookieJar) -> Option<String> {
        let cookie = jar.get(CSRF_COOKIE)?;
        let (token, signature) = cookie.value().split_once('.')?;
        let signature = general_purpose::URL_SAFE_NO_PAD.decode(signature).ok()?;

        let mut mac = self.mac();
        mac.update(token.as_bytes());
        mac.verify_slice(&signature).ok()?;

        Some(token.to_string())
    }

    fn csrf_signature(&self, token: &str) -> String {
        let mut mac = self.mac();
        mac.update(token.as_bytes());
        general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any length")
    }

    fn cookie(&self, name: &'static str, value: String, max_age_secs: Option<i64>) -> Cookie<'static> {
        let builder = Cookie::build((name, value))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax);

        match max_age_secs {
            Some(secs) => builder.max_age(time::Duration::seconds(secs)).build(),
            None => builder.build(),
        }
    }
}

/// Cookie to hand to `CookieJar::remove` for `name`.
pub fn removal(name: &'static str) -> Cookie<'static> {
    Cookie::build((name, "")).path("/").build()
}

/// Only same-origin redirect targets are honoured; anything else becomes `/`.
pub fn safe_callback_url(base_url: &str, candidate: Option<&str>) -> String {
    match candidate {
        Some(url)
            if url.starts_with('/') && !url.starts_with("//") && !url.starts_with("/\\") =>
        {
            url.to_string()
        }
        Some(url) if url == base_url || url.starts_with(&format!("{}/", base_url)) => {
            url.to_string()
        }
        _ => "/".to_string(),
    }
}

/// The current session, if the request carries a valid session token.
#[derive(Debug, Clone)]
pub struct CurrentSession(pub Option<SessionClaims>);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentSession
where
    SessionManager: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session_manager = SessionManager::from_ref(state);
        let jar = CookieJar::from_headers(&parts.headers);

        Ok(CurrentSession(session_manager.session_from_jar(&jar)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{GitHubEndpoints, GitHubProvider, SessionOptions},
        models::SessionUser,
    };
    use axum::http::{header, HeaderMap, HeaderValue};

    fn test_manager(secret: &str) -> SessionManager {
        manager_with_max_age(secret, SessionOptions::default())
    }

    fn manager_with_max_age(secret: &str, session: SessionOptions) -> SessionManager {
        SessionManager::new(&AuthOptions {
            provider: GitHubProvider {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
                endpoints: GitHubEndpoints::default(),
            },
            secret: secret.to_string(),
            base_url: "http://localhost:3000".to_string(),
            secure_cookies: false,
            session,
        })
    }

    fn octocat() -> ProviderProfile {
        ProviderProfile {
            id: "583231".to_string(),
            user: SessionUser {
                name: Some("octocat".to_string()),
                email: Some("o@x.com".to_string()),
                image: Some("http://i".to_string()),
            },
        }
    }

    fn jar_with(name: &str, value: &str) -> CookieJar {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("{}={}", name, value)).unwrap(),
        );
        CookieJar::from_headers(&headers)
    }

    #[test]
    fn test_issue_and_verify_session() {
        let manager = test_manager("test_secret");

        let (token, claims) = manager.issue(&octocat()).unwrap();
        assert_eq!(claims.exp - claims.iat, 60);

        let verified = manager.verify(&token).unwrap();
        assert_eq!(verified, claims);
        assert_eq!(verified.user(), octocat().user);
    }

    #[test]
    fn test_huge_max_age_saturates() {
        let manager = manager_with_max_age(
            "test_secret",
            SessionOptions {
                max_age: std::time::Duration::from_secs(u64::MAX),
            },
        );
        assert_eq!(manager.max_age_secs(), i64::MAX);

        let (_, claims) = manager.issue(&octocat()).unwrap();
        assert_eq!(claims.exp, i64::MAX);
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let manager = test_manager("test_secret");
        let now = Utc::now().timestamp();

        let (_, claims) = manager.issue(&octocat()).unwrap();
        let stale = SessionClaims {
            iat: now - 61,
            exp: now - 1,
            ..claims
        };
        let token = manager.sign(&stale).unwrap();

        assert!(matches!(manager.verify(&token), Err(AuthError::Token(_))));
        assert!(manager
            .session_from_jar(&jar_with(SESSION_COOKIE, &token))
            .is_none());
    }

    #[test]
    fn test_token_signed_with_other_secret_is_rejected() {
        let (token, _) = test_manager("other_secret").issue(&octocat()).unwrap();

        assert!(test_manager("test_secret").verify(&token).is_err());
    }

    #[test]
    fn test_refresh_extends_expiry() {
        let manager = test_manager("test_secret");
        let (_, claims) = manager.issue(&octocat()).unwrap();
        let older = SessionClaims {
            iat: claims.iat - 30,
            exp: claims.exp - 30,
            ..claims.clone()
        };

        let (token, refreshed) = manager.refresh(&older).unwrap();
        assert!(refreshed.exp > older.exp);
        assert_eq!(refreshed.sub, claims.sub);
        assert_ne!(refreshed.jti, older.jti);
        assert_eq!(manager.verify(&token).unwrap(), refreshed);
    }

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = test_manager("test_secret").session_cookie("token".to_string());

        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(time::Duration::seconds(60)));
    }

    #[test]
    fn test_state_cookie_round_trip() {
        let manager = test_manager("test_secret");
        let cookie = manager.state_cookie("random_state").unwrap();

        let jar = jar_with(STATE_COOKIE, cookie.value());
        assert_eq!(manager.state_from_jar(&jar).unwrap(), "random_state");

        let forged = jar_with(STATE_COOKIE, "random_state");
        assert!(matches!(
            manager.state_from_jar(&forged),
            Err(AuthError::StateMismatch)
        ));
        assert!(matches!(
            manager.state_from_jar(&CookieJar::new()),
            Err(AuthError::StateMismatch)
        ));
    }

    #[test]
    fn test_csrf_double_submit() {
        let manager = test_manager("test_secret");
        let (jar, token) = manager.ensure_csrf(CookieJar::new());
        let cookie_value = jar.get(CSRF_COOKIE).unwrap().value().to_string();

        let request_jar = jar_with(CSRF_COOKIE, &cookie_value);
        assert!(manager.verify_csrf(&request_jar, Some(token.as_str())).is_ok());
        assert!(manager.verify_csrf(&request_jar, Some("other")).is_err());
        assert!(manager.verify_csrf(&request_jar, None).is_err());

        // Existing valid cookie is reused
        let (_, reused) = manager.ensure_csrf(request_jar);
        assert_eq!(reused, token);
    }

    #[test]
    fn test_csrf_cookie_with_bad_signature_is_ignored() {
        let manager = test_manager("test_secret");
        let forged = jar_with(CSRF_COOKIE, "token.c2lnbmF0dXJl");

        assert!(matches!(
            manager.verify_csrf(&forged, Some("token")),
            Err(AuthError::MissingCsrf)
        ));
    }

    #[test]
    fn test_safe_callback_url() {
        let base = "http://localhost:3000";

        assert_eq!(safe_callback_url(base, Some("/dashboard")), "/dashboard");
        assert_eq!(
            safe_callback_url(base, Some("http://localhost:3000/dashboard")),
            "http://localhost:3000/dashboard"
        );
        assert_eq!(safe_callback_url(base, Some("//evil.example")), "/");
        assert_eq!(safe_callback_url(base, Some("https://evil.example/")), "/");
        assert_eq!(
            safe_callback_url(base, Some("http://localhost:3000.evil.example")),
            "/"
        );
        assert_eq!(safe_callback_url(base, None), "/");
    }
}
