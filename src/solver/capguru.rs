use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::time::sleep;

use crate::config::CaptchaConfig;
use crate::errors::CaptchaError;
use crate::http_client::HttpClient;

use super::{CaptchaSolver, SolveTask};

const CAPTCHA_NOT_READY: &str = "CAPCHA_NOT_READY";
const CAPTCHA_UNSOLVABLE: &str = "ERROR_CAPTCHA_UNSOLVABLE";

/// cap.guru client. The `request` field doubles as task id, sentinel
/// ("not ready" / "unsolvable") and solved token depending on the call.
pub struct CapguruClient {
    http: Arc<HttpClient>,
    api_key: String,
    base_url: String,
    attempts: usize,
    delay: Duration,
}

#[derive(Deserialize)]
struct VendorResponse {
    #[serde(default)]
    status: i64,
    request: Option<serde_json::Value>,
}

impl CapguruClient {
    pub fn new(http: Arc<HttpClient>, config: &CaptchaConfig) -> Self {
        Self {
            http,
            api_key: config.capguru_key.clone(),
            base_url: config.capguru_base_url.clone(),
            attempts: config.attempts,
            delay: Duration::from_secs(config.delay_secs),
        }
    }

    fn parse(json: serde_json::Value) -> Result<VendorResponse, CaptchaError> {
        serde_json::from_value(json)
            .map_err(|_| CaptchaError::Vendor("[cap.guru] unexpected response shape".to_string()))
    }
}

#[async_trait]
impl CaptchaSolver for CapguruClient {
    async fn create_task(&self, site_key: &str, page_url: &str) -> Result<SolveTask, CaptchaError> {
        let body = json!({
            "key": self.api_key,
            "json": 1,
            "method": "userrecaptcha",
            "googlekey": site_key,
            "pageurl": page_url,
        });
        let response = self
            .http
            .post_json(&format!("{}/in.php", self.base_url), body)
            .await?;
        let parsed = Self::parse(response.json)?;

        let task_id = match parsed.request {
            Some(serde_json::Value::String(id)) if !id.is_empty() => id,
            other => {
                return Err(CaptchaError::Vendor(format!(
                    "[cap.guru] create failed: {:?}",
                    other
                )))
            }
        };
        if parsed.status != 1 {
            return Err(CaptchaError::Vendor(format!(
                "[cap.guru] create rejected: {}",
                task_id
            )));
        }
        Ok(SolveTask::Text(task_id))
    }

    async fn fetch_token(&self, task: &SolveTask) -> Result<String, CaptchaError> {
        let task_id = match task {
            SolveTask::Text(id) => id.clone(),
            other => {
                return Err(CaptchaError::Vendor(format!(
                    "[cap.guru] unexpected task handle: {:?}",
                    other
                )))
            }
        };
        let body = json!({
            "key": self.api_key,
            "json": 1,
            "action": "get",
            "id": task_id,
        });
        let url = format!("{}/res.php", self.base_url);

        for _ in 0..self.attempts {
            let response = match self.http.post_json(&url, body.clone()).await {
                Ok(response) => response,
                Err(e) => {
                    // A failed poll wastes the attempt, not the whole solve
                    log::warn!("[cap.guru] poll request failed: {}", e);
                    continue;
                }
            };
            let parsed = Self::parse(response.json)?;

            match parsed.request {
                Some(serde_json::Value::String(s)) if s == CAPTCHA_NOT_READY => {
                    sleep(self.delay).await;
                    continue;
                }
                Some(serde_json::Value::String(s)) if s == CAPTCHA_UNSOLVABLE => {
                    return Err(CaptchaError::Unsolvable)
                }
                Some(serde_json::Value::String(token)) if parsed.status == 1 => return Ok(token),
                other => {
                    return Err(CaptchaError::Vendor(format!(
                        "[cap.guru] unexpected poll response: {:?}",
                        other
                    )))
                }
            }
        }
        Err(CaptchaError::Timeout {
            attempts: self.attempts,
        })
    }
}
