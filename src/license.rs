//! License lookup against the portal's users endpoint
//!
//! The endpoint answers with `{"success": "true"|"false", ...}`. The match
//! order below matters: a "not logged in" rejection must not be read as a
//! generic error, and a successful-but-empty listing must not be read as a
//! rejected session.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::config::PortalConfig;
use crate::errors::HttpError;
use crate::http_client::HttpClient;
use crate::models::{LicenseOutcome, LicenseStatus};

const API_NOT_AUTHORIZED: &str = "no login";

#[derive(Deserialize)]
struct UsersPageResponse {
    success: Option<String>,
    data: Option<Vec<LicenseEntry>>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct LicenseEntry {
    user: Option<String>,
    script: Option<String>,
    /// License expiry as epoch seconds
    expires: Option<i64>,
}

pub struct LicenseApiClient {
    http: Arc<HttpClient>,
    base_url: String,
    users_url: String,
    session_cookie: String,
}

impl LicenseApiClient {
    pub fn new(http: Arc<HttpClient>, portal: &PortalConfig) -> Self {
        Self {
            http,
            base_url: portal.base_url.clone(),
            users_url: portal.users_url(),
            session_cookie: portal.session_cookie.clone(),
        }
    }

    /// Inject an authenticated session cookie so subsequent lookups carry it.
    pub fn set_session_cookie(&self, value: &str) {
        self.http.set_cookie(&self.base_url, &self.session_cookie, value);
    }

    pub async fn fetch_license(&self, user: &str, script: &str) -> Result<LicenseOutcome, HttpError> {
        let body = json!({"page": 0, "user": user, "script": script});
        let response = self.http.post_json(&self.users_url, body).await?;
        Ok(classify(response.json, user, script, Utc::now()))
    }
}

/// Classify a raw endpoint response into a license outcome. First match
/// wins; anything that fits no arm is an error.
fn classify(
    json: serde_json::Value,
    user: &str,
    script: &str,
    now: DateTime<Utc>,
) -> LicenseOutcome {
    let Ok(parsed) = serde_json::from_value::<UsersPageResponse>(json) else {
        return LicenseOutcome::status_only(LicenseStatus::Error);
    };
    let UsersPageResponse {
        success,
        data,
        message,
    } = parsed;

    match (success.as_deref(), data, message.as_deref()) {
        (Some("true"), Some(entries), _) => {
            let matching = entries.into_iter().find(|entry| {
                entry.user.as_deref() == Some(user) && entry.script.as_deref() == Some(script)
            });
            match matching {
                None => LicenseOutcome::status_only(LicenseStatus::CredsNotFound),
                Some(entry) => match entry.expires.and_then(|secs| DateTime::from_timestamp(secs, 0)) {
                    Some(expires_at) => LicenseOutcome::ok(expires_at, expires_at < now),
                    None => LicenseOutcome::status_only(LicenseStatus::Error),
                },
            }
        }
        (Some("false"), _, Some(API_NOT_AUTHORIZED)) => {
            LicenseOutcome::status_only(LicenseStatus::NotAuthorized)
        }
        _ => LicenseOutcome::status_only(LicenseStatus::Error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::HttpClientConfig;
    use crate::metrics::MetricsTracker;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_matching_entry_is_ok_with_expiry() {
        let future = now().timestamp() + 86_400;
        let outcome = classify(
            json!({"success": "true", "data": [{"user": "u", "script": "s", "expires": future}]}),
            "u",
            "s",
            now(),
        );
        assert_eq!(outcome.status, LicenseStatus::Ok);
        assert_eq!(outcome.is_expired, Some(false));
        assert_eq!(outcome.expires_at.map(|t| t.timestamp()), Some(future));
    }

    #[test]
    fn test_past_expiry_is_flagged() {
        let past = now().timestamp() - 86_400;
        let outcome = classify(
            json!({"success": "true", "data": [{"user": "u", "script": "s", "expires": past}]}),
            "u",
            "s",
            now(),
        );
        assert_eq!(outcome.status, LicenseStatus::Ok);
        assert_eq!(outcome.is_expired, Some(true));
    }

    #[test]
    fn test_empty_listing_is_creds_not_found() {
        let outcome = classify(json!({"success": "true", "data": []}), "u", "s", now());
        assert_eq!(outcome.status, LicenseStatus::CredsNotFound);
        assert_eq!(outcome.expires_at, None);
        assert_eq!(outcome.is_expired, None);
    }

    #[test]
    fn test_partial_match_is_creds_not_found() {
        // Same user, different script: not a match
        let outcome = classify(
            json!({"success": "true", "data": [{"user": "u", "script": "other", "expires": 0}]}),
            "u",
            "s",
            now(),
        );
        assert_eq!(outcome.status, LicenseStatus::CredsNotFound);
    }

    #[test]
    fn test_no_login_message_is_not_authorized() {
        let outcome = classify(
            json!({"success": "false", "message": "no login"}),
            "u",
            "s",
            now(),
        );
        assert_eq!(outcome.status, LicenseStatus::NotAuthorized);
    }

    #[test]
    fn test_unexpected_shapes_are_errors() {
        for body in [
            json!({"success": "false", "message": "maintenance"}),
            json!({"success": "true"}),
            json!({"weird": 1}),
            json!([1, 2, 3]),
            // Matching entry with an unusable expiry
            json!({"success": "true", "data": [{"user": "u", "script": "s"}]}),
        ] {
            let outcome = classify(body, "u", "s", now());
            assert_eq!(outcome.status, LicenseStatus::Error);
        }
    }

    #[tokio::test]
    async fn test_fetch_license_posts_expected_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bas/users/page"))
            .and(body_json(json!({"page": 0, "user": "u", "script": "s"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": "false", "message": "no login"})),
            )
            .mount(&server)
            .await;

        let http_config = HttpClientConfig {
            timeout: Duration::from_secs(5),
            max_retries: 0,
            initial_retry_delay_ms: 1,
            max_retry_delay_ms: 2,
        };
        let http = Arc::new(HttpClient::with_config(http_config, MetricsTracker::new()).unwrap());
        let portal = PortalConfig {
            base_url: server.uri(),
            ..PortalConfig::default()
        };
        let client = LicenseApiClient::new(http, &portal);

        let outcome = client.fetch_license("u", "s").await.unwrap();
        assert_eq!(outcome.status, LicenseStatus::NotAuthorized);
    }
}
