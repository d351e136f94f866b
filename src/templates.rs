use askama::Template;

use crate::models::SessionUser;

#[derive(Debug, Clone)]
pub struct ProviderButton {
    pub id: &'static str,
    pub name: &'static str,
    pub action: String,
}

#[derive(Template)]
#[template(path = "signin.html")]
pub struct SignInTemplate {
    pub providers: Vec<ProviderButton>,
    pub csrf_token: String,
    pub callback_url: Option<String>,
    pub error: Option<String>,
}

#[derive(Template)]
#[template(path = "signout.html")]
pub struct SignOutTemplate {
    pub csrf_token: String,
    pub callback_url: Option<String>,
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate {
    pub code: String,
    pub message: &'static str,
}

/// Profile card. Absent session fields render as empty strings.
#[derive(Template)]
#[template(path = "dashboard.html")]
pub struct DashboardTemplate {
    pub name: String,
    pub email: String,
    pub profile_url: String,
    pub avatar_src: String,
}

impl DashboardTemplate {
    pub fn new(user: SessionUser) -> Self {
        let name = user.name.unwrap_or_default();
        Self {
            profile_url: escape_html_attr(&format!(
                "https://github.com/{}",
                urlencoding::encode(&name)
            )),
            avatar_src: escape_html_attr(user.image.as_deref().unwrap_or("")),
            email: user.email.unwrap_or_default(),
            name,
        }
    }
}

// askama's escaper also rewrites '/', which mangles URLs in attributes
fn escape_html_attr(value: &str) -> String {
    value
        .chars()
        .map(|ch| match ch {
            '&' => "&amp;".to_string(),
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            '"' => "&quot;".to_string(),
            '\'' => "&#x27;".to_string(),
            _ => ch.to_string(),
        })
        .collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dashboard_renders_full_profile() {
        let html = DashboardTemplate::new(SessionUser {
            name: Some("octocat".to_string()),
            email: Some("o@x.com".to_string()),
            image: Some("http://i".to_string()),
        })
        .render()
        .unwrap();

        assert!(html.contains(r#"href="https://github.com/octocat""#));
        assert!(html.contains(r#"<img src="http://i" alt="Avatar""#));
        assert!(html.contains(">octocat</p>"));
        assert!(html.contains(">o@x.com</p>"));
    }

    #[test]
    fn test_dashboard_renders_empty_profile() {
        let html = DashboardTemplate::new(SessionUser::default()).render().unwrap();

        assert!(html.contains(r#"href="https://github.com/""#));
        assert!(html.contains(r#"<img src="" alt="Avatar""#));
        assert!(html.contains(r#"<p class="profile-name"></p>"#));
        assert!(html.contains(r#"<p class="profile-email"></p>"#));
    }

    #[test]
    fn test_dashboard_escapes_profile_fields() {
        let html = DashboardTemplate::new(SessionUser {
            name: Some("<script>alert(1)</script>".to_string()),
            email: None,
            image: Some(r#"x" onerror="alert(1)"#.to_string()),
        })
        .render()
        .unwrap();

        assert!(!html.contains("<script>"));
        assert!(!html.contains(r#"onerror="alert"#));
        assert!(html.contains("https://github.com/%3Cscript%3Ealert%281%29%3C%2Fscript%3E"));
    }

    #[test]
    fn test_signin_page_lists_github() {
        let html = SignInTemplate {
            providers: vec![ProviderButton {
                id: "github",
                name: "GitHub",
                action: "/api/auth/signin/github".to_string(),
            }],
            csrf_token: "csrf123".to_string(),
            callback_url: Some("/dashboard".to_string()),
            error: None,
        }
        .render()
        .unwrap();

        assert!(html.contains(r#"action="/api/auth/signin/github""#));
        assert!(html.contains(r#"name="csrfToken" value="csrf123""#));
        assert!(html.contains("Sign in with GitHub"));
        assert!(html.contains(r#"name="callbackUrl""#));
    }

    #[test]
    fn test_error_page_shows_message() {
        let html = ErrorTemplate {
            code: "AccessDenied".to_string(),
            message: "You do not have permission to sign in.",
        }
        .render()
        .unwrap();

        assert!(html.contains("You do not have permission to sign in."));
        assert!(html.contains("AccessDenied"));
    }
}
