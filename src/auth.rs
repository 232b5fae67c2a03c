//! Login handshake against the portal
//!
//! One call to [`AuthClient::fetch_session_cookie`] performs the whole
//! sequence: load the login page, solve its recaptcha through the
//! configured vendor, submit credentials, validate the outcome and pull
//! the session cookie out of the jar. Every step failure is terminal for
//! that refresh attempt; nothing here is retried.

use std::sync::Arc;

use crate::config::PortalConfig;
use crate::dom;
use crate::errors::AuthError;
use crate::http_client::HttpClient;
use crate::solver::CaptchaSolver;

const SITE_KEY_SELECTOR: &str = "div.g-recaptcha";
const SITE_KEY_ATTR: &str = "data-sitekey";
const ALERT_SELECTOR: &str = r#"div[role="alert"]"#;
const CAPTCHA_SOLVED_WRONG: &str = "Please check recaptcha";

pub struct AuthClient {
    http: Arc<HttpClient>,
    solver: Arc<dyn CaptchaSolver>,
    login_url: String,
    success_url: String,
    session_cookie: String,
    username: String,
    password: String,
}

impl AuthClient {
    pub fn new(http: Arc<HttpClient>, solver: Arc<dyn CaptchaSolver>, portal: &PortalConfig) -> Self {
        Self {
            http,
            solver,
            login_url: portal.login_url(),
            success_url: portal.success_url(),
            session_cookie: portal.session_cookie.clone(),
            username: portal.username.clone(),
            password: portal.password.clone(),
        }
    }

    async fn solve_captcha(&self, site_key: &str) -> Result<String, AuthError> {
        let task = self.solver.create_task(site_key, &self.login_url).await?;
        let token = self.solver.fetch_token(&task).await?;
        Ok(token)
    }

    pub async fn fetch_session_cookie(&self) -> Result<String, AuthError> {
        let page = self.http.get_text(&self.login_url).await?;
        let site_key = dom::first_attr(&page.body, SITE_KEY_SELECTOR, SITE_KEY_ATTR)
            .ok_or(AuthError::SiteKeyMissing)?;

        log::info!("Solving login captcha for site key {}", site_key);
        let token = self.solve_captcha(&site_key).await?;

        let form = vec![
            ("username".to_string(), self.username.clone()),
            ("password".to_string(), self.password.clone()),
            ("g-recaptcha-response".to_string(), token),
        ];
        let response = self.http.post_form_text(&self.login_url, form).await?;

        if let Some(alert) = dom::first_text(&response.body, ALERT_SELECTOR) {
            if alert == CAPTCHA_SOLVED_WRONG {
                return Err(AuthError::CaptchaRejected);
            }
            return Err(AuthError::LoginRejected(alert));
        }

        // A valid login lands on the premium page; anywhere else means the
        // account no longer has access
        if response.url.as_str().trim_end_matches('/') != self.success_url.trim_end_matches('/') {
            return Err(AuthError::PremiumExpired);
        }

        match self.http.cookie_value(&self.login_url, &self.session_cookie) {
            Some(value) if !value.is_empty() => {
                log::info!("Login succeeded, session cookie obtained");
                Ok(value)
            }
            _ => Err(AuthError::SessionCookieMissing),
        }
    }
}
