use std::{collections::HashMap, sync::Arc};

use askama::Template;
use axum::{
    extract::{FromRef, Path, Query, State},
    http::{Method, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Form, Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::{
    auth::{AuthOptions, AuthService, GitHubProvider},
    error::{error_message, AppError, AuthError, SIGNIN_PATH},
    session::{
        removal, safe_callback_url, CurrentSession, SessionManager, CALLBACK_URL_COOKIE,
        SESSION_COOKIE, STATE_COOKIE,
    },
    templates::{DashboardTemplate, ErrorTemplate, ProviderButton, SignInTemplate, SignOutTemplate},
};

// Application state
#[derive(Debug, Clone)]
pub struct AppState {
    pub options: Arc<AuthOptions>,
    pub auth_service: AuthService,
    pub session_manager: SessionManager,
}

impl AppState {
    pub fn new(options: AuthOptions) -> Result<Self, AppError> {
        let auth_service = AuthService::new(&options)?;
        let session_manager = SessionManager::new(&options);

        Ok(Self {
            options: Arc::new(options),
            auth_service,
            session_manager,
        })
    }
}

impl FromRef<AppState> for SessionManager {
    fn from_ref(state: &AppState) -> Self {
        state.session_manager.clone()
    }
}

/// Sub-routes of `/api/auth/*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthAction {
    Providers,
    Session,
    Csrf,
    SignIn(Option<String>),
    Callback(String),
    SignOut,
    Error,
}

impl AuthAction {
    pub fn parse(path: &str) -> Option<Self> {
        let segments: Vec<&str> = path
            .trim_matches('/')
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();

        match segments.as_slice() {
            ["providers"] => Some(AuthAction::Providers),
            ["session"] => Some(AuthAction::Session),
            ["csrf"] => Some(AuthAction::Csrf),
            ["signin"] => Some(AuthAction::SignIn(None)),
            ["signin", provider] => Some(AuthAction::SignIn(Some(provider.to_string()))),
            ["callback", provider] => Some(AuthAction::Callback(provider.to_string())),
            ["signout"] => Some(AuthAction::SignOut),
            ["error"] => Some(AuthAction::Error),
            _ => None,
        }
    }
}

// Query string and, for form POSTs, the urlencoded body of an auth request
#[derive(Debug, Default, Deserialize)]
pub struct AuthParams {
    #[serde(rename = "csrfToken")]
    pub csrf_token: Option<String>,
    #[serde(rename = "callbackUrl")]
    pub callback_url: Option<String>,
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub csrf: Option<String>,
}

/// Single entry point for every authentication route, mounted for GET and POST.
pub async fn auth_handler(
    State(state): State<AppState>,
    method: Method,
    Path(path): Path<String>,
    jar: CookieJar,
    query: Option<Query<AuthParams>>,
    form: Option<Form<AuthParams>>,
) -> Result<Response, AppError> {
    let action = AuthAction::parse(&path).ok_or(AppError::NotFound)?;
    // Bodies that are not urlencoded forms (empty, JSON) fall back to the query string
    let params = match (form, query) {
        (Some(Form(params)), _) | (None, Some(Query(params))) => params,
        (None, None) => AuthParams::default(),
    };
    let is_post = method == Method::POST;
    tracing::debug!("Auth action {:?} via {}", action, method);

    match action {
        AuthAction::Providers if !is_post => Ok(providers(&state)),
        AuthAction::Session => session(&state, jar),
        AuthAction::Csrf if !is_post => Ok(csrf(&state, jar)),
        AuthAction::SignIn(None) if !is_post => signin_page(&state, jar, params),
        AuthAction::SignIn(Some(provider)) => {
            ensure_provider(&provider)?;
            if is_post {
                signin(&state, jar, params)
            } else {
                Ok(Redirect::to(SIGNIN_PATH).into_response())
            }
        }
        AuthAction::Callback(provider) => {
            ensure_provider(&provider)?;
            let cleared = jar
                .clone()
                .remove(removal(STATE_COOKIE))
                .remove(removal(CALLBACK_URL_COOKIE));

            match callback(&state, jar, params).await {
                Ok(response) => Ok(response),
                Err(e) => Ok((cleared, e).into_response()),
            }
        }
        AuthAction::SignOut if is_post => signout(&state, jar, params),
        AuthAction::SignOut => signout_page(&state, jar, params),
        AuthAction::Error if !is_post => error_page(params),
        _ => Err(AppError::MethodNotAllowed),
    }
}

fn ensure_provider(provider: &str) -> Result<(), AuthError> {
    if provider == GitHubProvider::ID {
        Ok(())
    } else {
        Err(AuthError::InvalidProvider(provider.to_string()))
    }
}

fn providers(state: &AppState) -> Response {
    let info = AuthService::provider_info(&state.options);
    Json(HashMap::from([(GitHubProvider::ID, info)])).into_response()
}

fn session(state: &AppState, jar: CookieJar) -> Result<Response, AppError> {
    let Some(claims) = state.session_manager.session_from_jar(&jar) else {
        let jar = if jar.get(SESSION_COOKIE).is_some() {
            jar.remove(removal(SESSION_COOKIE))
        } else {
            jar
        };
        return Ok((jar, Json(json!({}))).into_response());
    };

    let (token, claims) = state.session_manager.refresh(&claims)?;
    let jar = jar.add(state.session_manager.session_cookie(token));

    Ok((jar, Json(claims.session())).into_response())
}

fn csrf(state: &AppState, jar: CookieJar) -> Response {
    let (jar, token) = state.session_manager.ensure_csrf(jar);
    (jar, Json(json!({ "csrfToken": token }))).into_response()
}

fn signin_page(state: &AppState, jar: CookieJar, params: AuthParams) -> Result<Response, AppError> {
    let (jar, csrf_token) = state.session_manager.ensure_csrf(jar);

    let error = if params.csrf.is_some() {
        Some("Your sign in request expired. Please try again.".to_string())
    } else {
        params.error.as_deref().map(|code| error_message(code).to_string())
    };

    let template = SignInTemplate {
        providers: vec![ProviderButton {
            id: GitHubProvider::ID,
            name: GitHubProvider::NAME,
            action: format!("{}/{}", SIGNIN_PATH, GitHubProvider::ID),
        }],
        csrf_token,
        callback_url: params.callback_url,
        error,
    };

    let html = template.render()?;
    Ok((jar, Html(html)).into_response())
}

fn signin(state: &AppState, jar: CookieJar, params: AuthParams) -> Result<Response, AppError> {
    state
        .session_manager
        .verify_csrf(&jar, params.csrf_token.as_deref())?;

    let (auth_url, csrf_token) = state.auth_service.authorize_url();
    let callback_url = safe_callback_url(&state.options.base_url, params.callback_url.as_deref());

    let jar = jar
        .add(state.session_manager.state_cookie(csrf_token.secret())?)
        .add(state.session_manager.callback_url_cookie(callback_url));

    tracing::debug!("Redirecting to GitHub for sign in");
    Ok((jar, Redirect::to(&auth_url)).into_response())
}

async fn callback(state: &AppState, jar: CookieJar, params: AuthParams) -> Result<Response, AppError> {
    if let Some(error) = params.error {
        tracing::error!("GitHub OAuth2 error: {}", error);
        return Err(AuthError::ProviderDenied(error).into());
    }

    let code = params.code.ok_or(AuthError::MissingAuthCode)?;
    let state_param = params.state.ok_or(AuthError::StateMismatch)?;
    let expected_state = state.session_manager.state_from_jar(&jar)?;

    let profile = state
        .auth_service
        .handle_callback(code, &state_param, &expected_state)
        .await?;
    let (token, _) = state.session_manager.issue(&profile)?;

    let redirect_to = safe_callback_url(
        &state.options.base_url,
        jar.get(CALLBACK_URL_COOKIE).map(|cookie| cookie.value()),
    );

    let jar = jar
        .add(state.session_manager.session_cookie(token))
        .remove(removal(STATE_COOKIE))
        .remove(removal(CALLBACK_URL_COOKIE));

    tracing::info!("User {} successfully authenticated via GitHub", profile.id);
    Ok((jar, Redirect::to(&redirect_to)).into_response())
}

fn signout_page(state: &AppState, jar: CookieJar, params: AuthParams) -> Result<Response, AppError> {
    let (jar, csrf_token) = state.session_manager.ensure_csrf(jar);

    let template = SignOutTemplate {
        csrf_token,
        callback_url: params.callback_url,
    };

    let html = template.render()?;
    Ok((jar, Html(html)).into_response())
}

fn signout(state: &AppState, jar: CookieJar, params: AuthParams) -> Result<Response, AppError> {
    state
        .session_manager
        .verify_csrf(&jar, params.csrf_token.as_deref())?;

    let redirect_to = safe_callback_url(&state.options.base_url, params.callback_url.as_deref());
    let jar = jar.remove(removal(SESSION_COOKIE));

    tracing::info!("User signed out");
    Ok((jar, Redirect::to(&redirect_to)).into_response())
}

fn error_page(params: AuthParams) -> Result<Response, AppError> {
    let code = params.error.unwrap_or_else(|| "Default".to_string());
    let status = match code.as_str() {
        "Configuration" => StatusCode::INTERNAL_SERVER_ERROR,
        "AccessDenied" | "Verification" => StatusCode::FORBIDDEN,
        _ => StatusCode::OK,
    };

    let template = ErrorTemplate {
        message: error_message(&code),
        code,
    };

    let html = template.render()?;
    Ok((status, Html(html)).into_response())
}

/// Profile card for the current session. Visitors without a session get the
/// same card with every field empty.
pub async fn dashboard_handler(
    CurrentSession(claims): CurrentSession,
) -> Result<impl IntoResponse, AppError> {
    if claims.is_none() {
        tracing::debug!("Rendering dashboard without a session");
    }

    let user = claims.map(|claims| claims.user()).unwrap_or_default();
    let html = DashboardTemplate::new(user).render()?;
    Ok(Html(html))
}

pub async fn root_handler() -> Redirect {
    Redirect::to("/dashboard")
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/api/auth/*nextauth", get(auth_handler).post(auth_handler))
        .route("/dashboard", get(dashboard_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
