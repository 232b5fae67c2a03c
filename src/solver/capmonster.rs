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

const STATUS_PROCESSING: &str = "processing";
const STATUS_READY: &str = "ready";
const CAPTCHA_UNSOLVABLE: &str = "ERROR_CAPTCHA_UNSOLVABLE";

/// capmonster.cloud client. Unlike cap.guru it has a dedicated error
/// envelope (`errorId`/`errorCode`) and numeric task ids.
pub struct CapmonsterClient {
    http: Arc<HttpClient>,
    api_key: String,
    base_url: String,
    attempts: usize,
    delay: Duration,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateResponse {
    #[serde(default)]
    error_id: i64,
    task_id: Option<i64>,
    error_code: Option<String>,
    error_description: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultResponse {
    #[serde(default)]
    error_id: i64,
    status: Option<String>,
    error_code: Option<String>,
    error_description: Option<String>,
    solution: Option<Solution>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Solution {
    g_recaptcha_response: String,
}

impl CapmonsterClient {
    pub fn new(http: Arc<HttpClient>, config: &CaptchaConfig) -> Self {
        Self {
            http,
            api_key: config.capmonster_key.clone(),
            base_url: config.capmonster_base_url.clone(),
            attempts: config.attempts,
            delay: Duration::from_secs(config.delay_secs),
        }
    }

    fn error_string(error_code: Option<&str>, error_description: Option<&str>) -> String {
        error_description
            .or(error_code)
            .unwrap_or("UNKNOWN_ERROR")
            .to_string()
    }
}

#[async_trait]
impl CaptchaSolver for CapmonsterClient {
    async fn create_task(&self, site_key: &str, page_url: &str) -> Result<SolveTask, CaptchaError> {
        let body = json!({
            "clientKey": self.api_key,
            "task": {
                "type": "RecaptchaV2TaskProxyless",
                "websiteURL": page_url,
                "websiteKey": site_key,
            },
        });
        let response = self
            .http
            .post_json(&format!("{}/createTask", self.base_url), body)
            .await?;
        let parsed: CreateResponse = serde_json::from_value(response.json).map_err(|_| {
            CaptchaError::Vendor("[capmonster.cloud] unexpected response shape".to_string())
        })?;

        if parsed.error_id != 0 {
            return Err(CaptchaError::Vendor(format!(
                "[capmonster.cloud] {}",
                Self::error_string(parsed.error_code.as_deref(), parsed.error_description.as_deref())
            )));
        }
        match parsed.task_id {
            Some(task_id) => Ok(SolveTask::Numeric(task_id)),
            None => Err(CaptchaError::Vendor(
                "[capmonster.cloud] create returned no task id".to_string(),
            )),
        }
    }

    async fn fetch_token(&self, task: &SolveTask) -> Result<String, CaptchaError> {
        let task_id = match task {
            SolveTask::Numeric(id) => *id,
            other => {
                return Err(CaptchaError::Vendor(format!(
                    "[capmonster.cloud] unexpected task handle: {:?}",
                    other
                )))
            }
        };
        let body = json!({"clientKey": self.api_key, "taskId": task_id});
        let url = format!("{}/getTaskResult", self.base_url);

        for _ in 0..self.attempts {
            let response = match self.http.post_json(&url, body.clone()).await {
                Ok(response) => response,
                Err(e) => {
                    // A failed poll wastes the attempt, not the whole solve
                    log::warn!("[capmonster.cloud] poll request failed: {}", e);
                    continue;
                }
            };
            let parsed: ResultResponse = serde_json::from_value(response.json).map_err(|_| {
                CaptchaError::Vendor("[capmonster.cloud] unexpected response shape".to_string())
            })?;

            if parsed.status.as_deref() == Some(STATUS_PROCESSING) {
                sleep(self.delay).await;
                continue;
            }
            if parsed.error_code.as_deref() == Some(CAPTCHA_UNSOLVABLE) {
                return Err(CaptchaError::Unsolvable);
            }
            if parsed.status.as_deref() == Some(STATUS_READY) {
                return match parsed.solution {
                    Some(solution) => Ok(solution.g_recaptcha_response),
                    None => Err(CaptchaError::Vendor(
                        "[capmonster.cloud] ready without a solution".to_string(),
                    )),
                };
            }
            if parsed.error_id != 0 {
                return Err(CaptchaError::Vendor(format!(
                    "[capmonster.cloud] {}",
                    Self::error_string(parsed.error_code.as_deref(), parsed.error_description.as_deref())
                )));
            }
        }
        Err(CaptchaError::Timeout {
            attempts: self.attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::HttpClientConfig;
    use crate::metrics::MetricsTracker;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, attempts: usize) -> CapmonsterClient {
        let http_config = HttpClientConfig {
            timeout: Duration::from_secs(5),
            max_retries: 0,
            initial_retry_delay_ms: 1,
            max_retry_delay_ms: 2,
        };
        let http = Arc::new(HttpClient::with_config(http_config, MetricsTracker::new()).unwrap());
        let config = CaptchaConfig {
            capmonster_key: "key".to_string(),
            capmonster_base_url: server.uri(),
            attempts,
            delay_secs: 0,
            ..CaptchaConfig::default()
        };
        CapmonsterClient::new(http, &config)
    }

    #[tokio::test]
    async fn test_create_task_returns_numeric_handle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/createTask"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"errorId": 0, "taskId": 981})),
            )
            .mount(&server)
            .await;

        let solver = client_for(&server, 3);
        let task = solver.create_task("sitekey", "https://portal/login").await.unwrap();
        assert_eq!(task, SolveTask::Numeric(981));
    }

    #[tokio::test]
    async fn test_create_task_error_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/createTask"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"errorId": 1, "errorCode": "ERROR_ZERO_BALANCE"}),
            ))
            .mount(&server)
            .await;

        let solver = client_for(&server, 3);
        let result = solver.create_task("sitekey", "https://portal/login").await;
        match result {
            Err(CaptchaError::Vendor(message)) => assert!(message.contains("ERROR_ZERO_BALANCE")),
            other => panic!("expected vendor error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_poll_processing_then_ready() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/getTaskResult"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"errorId": 0, "status": STATUS_PROCESSING})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/getTaskResult"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errorId": 0,
                "status": STATUS_READY,
                "solution": {"gRecaptchaResponse": "solved-token"},
            })))
            .mount(&server)
            .await;

        let solver = client_for(&server, 3);
        let token = solver.fetch_token(&SolveTask::Numeric(981)).await.unwrap();
        assert_eq!(token, "solved-token");
    }

    #[tokio::test]
    async fn test_poll_times_out_after_exact_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/getTaskResult"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"errorId": 0, "status": STATUS_PROCESSING})),
            )
            .expect(3)
            .mount(&server)
            .await;

        let solver = client_for(&server, 3);
        let result = solver.fetch_token(&SolveTask::Numeric(981)).await;
        assert!(matches!(result, Err(CaptchaError::Timeout { attempts: 3 })));
    }

    #[tokio::test]
    async fn test_unsolvable_stops_polling_early() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/getTaskResult"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"errorId": 0, "status": STATUS_PROCESSING})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/getTaskResult"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"errorId": 12, "errorCode": CAPTCHA_UNSOLVABLE}),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let solver = client_for(&server, 3);
        let result = solver.fetch_token(&SolveTask::Numeric(981)).await;
        assert!(matches!(result, Err(CaptchaError::Unsolvable)));
    }
}
