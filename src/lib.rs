pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod session;
pub mod templates;

pub use auth::{AuthOptions, AuthService, GitHubEndpoints, GitHubProvider, SessionOptions};
pub use config::{Config, ConfigError};
pub use error::{AppError, AuthError};
pub use handlers::{app_router, auth_handler, dashboard_handler, root_handler, AppState};
pub use models::{Session, SessionClaims, SessionUser};
pub use session::{CurrentSession, SessionManager};
pub use templates::DashboardTemplate;
