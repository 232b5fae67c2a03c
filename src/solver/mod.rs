//! Captcha-solving vendor clients
//!
//! Both vendors share one contract: submit a challenge, then poll for the
//! solved token with a bounded number of attempts. Vendor selection is an
//! explicit match on a closed enum, resolved once at startup.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{CaptchaConfig, CaptchaService};
use crate::errors::CaptchaError;
use crate::http_client::HttpClient;

pub mod capguru;
pub mod capmonster;

pub use capguru::CapguruClient;
pub use capmonster::CapmonsterClient;

/// Vendor-issued handle for one solve. cap.guru hands out string ids,
/// capmonster numeric ones. Never persisted; lives for one login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolveTask {
    Text(String),
    Numeric(i64),
}

#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    /// Submit a challenge to the vendor; one request, no polling.
    async fn create_task(&self, site_key: &str, page_url: &str) -> Result<SolveTask, CaptchaError>;

    /// Poll the vendor until the task is solved, unsolvable, or the
    /// attempt budget runs out. A transport failure during one poll
    /// consumes that attempt and the loop continues.
    async fn fetch_token(&self, task: &SolveTask) -> Result<String, CaptchaError>;
}

pub fn build_solver(config: &CaptchaConfig, http: Arc<HttpClient>) -> Arc<dyn CaptchaSolver> {
    match config.service {
        CaptchaService::CapGuru => Arc::new(CapguruClient::new(http, config)),
        CaptchaService::Capmonster => Arc::new(CapmonsterClient::new(http, config)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsTracker;

    #[test]
    fn test_build_solver_matches_service() {
        let http = Arc::new(HttpClient::new(MetricsTracker::new()).unwrap());
        let mut config = CaptchaConfig::default();

        config.service = CaptchaService::CapGuru;
        build_solver(&config, http.clone());

        config.service = CaptchaService::Capmonster;
        build_solver(&config, http);
    }
}
