use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The user-visible part of a session. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub image: Option<String>,
}

/// Session as returned by `GET /api/auth/session`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user: SessionUser,
    pub expires: DateTime<Utc>,
}

/// JWT payload of the session cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

impl SessionClaims {
    pub fn user(&self) -> SessionUser {
        SessionUser {
            name: self.name.clone(),
            email: self.email.clone(),
            image: self.picture.clone(),
        }
    }

    pub fn session(&self) -> Session {
        Session {
            user: self.user(),
            expires: DateTime::from_timestamp(self.exp, 0).unwrap_or_else(Utc::now),
        }
    }
}

/// Profile attributes obtained from the provider after a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub id: String,
    pub user: SessionUser,
}
