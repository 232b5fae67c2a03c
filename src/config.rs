use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub portal: PortalConfig,
    #[serde(default)]
    pub captcha: CaptchaConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// Timeout for HTTP requests in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum number of retry attempts for failed requests
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Initial retry delay in milliseconds
    #[serde(default = "default_initial_retry_delay")]
    pub initial_retry_delay_ms: u64,

    /// Maximum retry delay in milliseconds
    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PortalConfig {
    #[serde(default = "default_portal_base")]
    pub base_url: String,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    /// Path the portal redirects to after a login with active premium access
    #[serde(default = "default_success_path")]
    pub success_path: String,
    /// Path of the license listing endpoint
    #[serde(default = "default_users_path")]
    pub users_path: String,
    /// Name of the authenticated session cookie
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Supported captcha-solving vendors. Selection is a closed enum, resolved
/// once at startup.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum CaptchaService {
    #[serde(rename = "cap.guru")]
    CapGuru,
    #[serde(rename = "capmonster.cloud")]
    Capmonster,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaptchaConfig {
    #[serde(default = "default_captcha_service")]
    pub service: CaptchaService,
    #[serde(default)]
    pub capguru_key: String,
    #[serde(default = "default_capguru_base")]
    pub capguru_base_url: String,
    #[serde(default)]
    pub capmonster_key: String,
    #[serde(default = "default_capmonster_base")]
    pub capmonster_base_url: String,
    /// Maximum polling attempts while waiting for a solve
    #[serde(default = "default_captcha_attempts")]
    pub attempts: usize,
    /// Delay between polling attempts in seconds
    #[serde(default = "default_captcha_delay")]
    pub delay_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// How many refresh-and-requery rounds one lookup may perform after
    /// observing a rejected session
    #[serde(default = "default_max_refresh_attempts")]
    pub max_refresh_attempts: u32,
}

fn default_bind() -> String { "127.0.0.1:8080".to_string() }
fn default_database_path() -> String { "license_tasks.db".to_string() }
fn default_timeout() -> u64 { 30 }
fn default_max_retries() -> usize { 4 }
fn default_initial_retry_delay() -> u64 { 500 }
fn default_max_retry_delay() -> u64 { 8000 }
fn default_portal_base() -> String { "https://bablosoft.com".to_string() }
fn default_login_path() -> String { "/login".to_string() }
fn default_success_path() -> String { "/personal/license/BASPremium".to_string() }
fn default_users_path() -> String { "/bas/users/page".to_string() }
fn default_session_cookie() -> String { "session".to_string() }
fn default_captcha_service() -> CaptchaService { CaptchaService::Capmonster }
fn default_capguru_base() -> String { "http://api.cap.guru".to_string() }
fn default_capmonster_base() -> String { "https://api.capmonster.cloud".to_string() }
fn default_captcha_attempts() -> usize { 60 }
fn default_captcha_delay() -> u64 { 2 }
fn default_max_refresh_attempts() -> u32 { 1 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            database_path: default_database_path(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            initial_retry_delay_ms: default_initial_retry_delay(),
            max_retry_delay_ms: default_max_retry_delay(),
        }
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: default_portal_base(),
            login_path: default_login_path(),
            success_path: default_success_path(),
            users_path: default_users_path(),
            session_cookie: default_session_cookie(),
            username: String::new(),
            password: String::new(),
        }
    }
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            service: default_captcha_service(),
            capguru_key: String::new(),
            capguru_base_url: default_capguru_base(),
            capmonster_key: String::new(),
            capmonster_base_url: default_capmonster_base(),
            attempts: default_captcha_attempts(),
            delay_secs: default_captcha_delay(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_refresh_attempts: default_max_refresh_attempts(),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let path = Path::new("config.toml");
        let mut config = Self::default();
        if path.exists() {
            if let Ok(content) = fs::read_to_string(path) {
                match toml::from_str::<Config>(&content) {
                    Ok(parsed) => config = parsed,
                    Err(e) => log::warn!("Ignoring malformed config.toml: {}", e),
                }
            }
        }
        config.apply_env_overrides();
        config
    }

    /// Secrets come from the environment, never from config.toml.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("PORTAL_USERNAME") {
            self.portal.username = v;
        }
        if let Ok(v) = env::var("PORTAL_PASSWORD") {
            self.portal.password = v;
        }
        if let Ok(v) = env::var("CAPGURU_KEY") {
            self.captcha.capguru_key = v;
        }
        if let Ok(v) = env::var("CAPMONSTER_KEY") {
            self.captcha.capmonster_key = v;
        }
    }
}

impl PortalConfig {
    pub fn login_url(&self) -> String {
        format!("{}{}", self.base_url, self.login_path)
    }

    pub fn success_url(&self) -> String {
        format!("{}{}", self.base_url, self.success_path)
    }

    pub fn users_url(&self) -> String {
        format!("{}{}", self.base_url, self.users_path)
    }
}

impl HttpConfig {
    /// Create a resilient HTTP client from this configuration
    pub fn client_config(&self) -> crate::http_client::HttpClientConfig {
        crate::http_client::HttpClientConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
            initial_retry_delay_ms: self.initial_retry_delay_ms,
            max_retry_delay_ms: self.max_retry_delay_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.captcha.attempts, 60);
        assert_eq!(config.captcha.delay_secs, 2);
        assert_eq!(config.captcha.service, CaptchaService::Capmonster);
        assert_eq!(config.worker.max_refresh_attempts, 1);
        assert_eq!(config.http.max_retries, 4);
        assert_eq!(config.portal.session_cookie, "session");
    }

    #[test]
    fn test_portal_urls() {
        let portal = PortalConfig::default();
        assert_eq!(portal.login_url(), "https://bablosoft.com/login");
        assert_eq!(portal.users_url(), "https://bablosoft.com/bas/users/page");
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [captcha]
            service = "cap.guru"
            attempts = 3
            delay_secs = 0

            [worker]
            max_refresh_attempts = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.captcha.service, CaptchaService::CapGuru);
        assert_eq!(config.captcha.attempts, 3);
        assert_eq!(config.captcha.delay_secs, 0);
        assert_eq!(config.worker.max_refresh_attempts, 2);
        // Untouched sections keep their defaults
        assert_eq!(config.http.timeout_secs, 30);
    }
}
