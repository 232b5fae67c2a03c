use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Client, ClientBuilder, Method, Response, StatusCode, Url};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use rand::Rng;

use crate::errors::HttpError;
use crate::metrics::MetricsTracker;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Configuration for the resilient HTTP client
#[derive(Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub max_retries: usize,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 4,
            initial_retry_delay_ms: 500,
            max_retry_delay_ms: 8000,
        }
    }
}

/// Text-mode response: final URL after redirects, status and raw body.
pub struct TextResponse {
    pub url: Url,
    pub status: StatusCode,
    pub body: String,
}

/// Structured-mode response: body decoded as JSON.
pub struct JsonResponse {
    pub url: Url,
    pub status: StatusCode,
    pub json: serde_json::Value,
}

enum Payload {
    Empty,
    Form(Vec<(String, String)>),
    Json(serde_json::Value),
}

/// HTTP client with automatic retry, a shared cookie jar and per-call
/// metrics. All portal and captcha-vendor traffic goes through it.
pub struct HttpClient {
    client: Client,
    jar: Arc<Jar>,
    config: HttpClientConfig,
    metrics: MetricsTracker,
}

impl HttpClient {
    pub fn new(metrics: MetricsTracker) -> Result<Self, reqwest::Error> {
        Self::with_config(HttpClientConfig::default(), metrics)
    }

    pub fn with_config(
        config: HttpClientConfig,
        metrics: MetricsTracker,
    ) -> Result<Self, reqwest::Error> {
        let jar = Arc::new(Jar::default());

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Accept",
            "text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8"
                .parse()
                .unwrap(),
        );
        headers.insert("Accept-Language", "en-US,en;q=0.9".parse().unwrap());

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .cookie_provider(jar.clone())
            .gzip(true)
            .brotli(true)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            jar,
            config,
            metrics,
        })
    }

    /// Calculate retry delay with exponential backoff and jitter
    fn calculate_retry_delay(&self, attempt: usize) -> Duration {
        let base_delay = self.config.initial_retry_delay_ms;
        let max_delay = self.config.max_retry_delay_ms;

        let delay_ms = (base_delay * 2u64.pow(attempt as u32)).min(max_delay);

        // Jitter of +-25% to avoid thundering herd
        let mut rng = rand::thread_rng();
        let jitter = rng.gen_range(0.75..=1.25);
        let final_delay_ms = (delay_ms as f64 * jitter) as u64;

        Duration::from_millis(final_delay_ms)
    }

    /// Check if a status code is retryable
    fn is_retryable_status(status: StatusCode) -> bool {
        matches!(
            status.as_u16(),
            // Rate limiting
            429 |
            // Server errors
            500 | 502 | 503 | 504 |
            // Cloudflare errors
            520 | 521 | 522 | 523 | 524 | 525 | 526 | 527
        )
    }

    fn build_request(&self, method: &Method, url: &str, payload: &Payload) -> reqwest::RequestBuilder {
        let builder = self.client.request(method.clone(), url);
        match payload {
            Payload::Empty => builder,
            Payload::Form(fields) => builder.form(fields),
            Payload::Json(body) => builder.json(body),
        }
    }

    async fn execute_with_retry(
        &self,
        method: &Method,
        url: &str,
        payload: &Payload,
    ) -> Result<Response, reqwest::Error> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match self.build_request(method, url, payload).send().await {
                Ok(response) => {
                    let status = response.status();

                    if Self::is_retryable_status(status) && attempt < self.config.max_retries {
                        log::warn!(
                            "Received retryable status {} for {}, attempt {}/{}",
                            status,
                            url,
                            attempt + 1,
                            self.config.max_retries + 1
                        );

                        let delay = self.calculate_retry_delay(attempt);
                        sleep(delay).await;
                        continue;
                    }

                    // Return the response even on a non-retryable error status
                    return Ok(response);
                }
                Err(e) => {
                    let should_retry = e.is_timeout()
                        || e.is_connect()
                        || e.is_request()
                        || e.status().map(Self::is_retryable_status).unwrap_or(false);

                    if should_retry && attempt < self.config.max_retries {
                        log::warn!(
                            "Request failed for {}, attempt {}/{}: {}",
                            url,
                            attempt + 1,
                            self.config.max_retries + 1,
                            e
                        );

                        let delay = self.calculate_retry_delay(attempt);
                        sleep(delay).await;
                        last_error = Some(e);
                        continue;
                    }

                    return Err(e);
                }
            }
        }

        // All retries exhausted
        Err(last_error.unwrap())
    }

    /// One logical call: metrics wrap the whole retry loop, including the
    /// failure path, so the in-flight gauge never leaks.
    async fn execute(
        &self,
        method: Method,
        url: &str,
        payload: Payload,
    ) -> Result<Response, HttpError> {
        let endpoint = endpoint_label(url);
        self.metrics.request_started(method.as_str(), &endpoint);
        let start = Instant::now();

        let result = self.execute_with_retry(&method, url, &payload).await;

        let (status, error) = match &result {
            Ok(response) => (Some(response.status().as_u16()), None),
            Err(e) => (None, Some(e.to_string())),
        };
        self.metrics.request_finished(
            method.as_str(),
            &endpoint,
            status,
            start.elapsed(),
            error.as_deref(),
        );

        result.map_err(HttpError::Transport)
    }

    /// GET a URL in text mode
    pub async fn get_text(&self, url: &str) -> Result<TextResponse, HttpError> {
        let response = self.execute(Method::GET, url, Payload::Empty).await?;
        into_text(response).await
    }

    /// POST a form in text mode (login submissions)
    pub async fn post_form_text(
        &self,
        url: &str,
        form: Vec<(String, String)>,
    ) -> Result<TextResponse, HttpError> {
        let response = self.execute(Method::POST, url, Payload::Form(form)).await?;
        into_text(response).await
    }

    /// POST a JSON body and decode the response as JSON
    pub async fn post_json(
        &self,
        url: &str,
        body: serde_json::Value,
    ) -> Result<JsonResponse, HttpError> {
        let response = self.execute(Method::POST, url, Payload::Json(body)).await?;
        let url = response.url().clone();
        let status = response.status();
        let text = response.text().await.map_err(HttpError::Transport)?;
        let json = serde_json::from_str(&text).map_err(|_| HttpError::InvalidJson {
            url: url.to_string(),
        })?;
        Ok(JsonResponse { url, status, json })
    }

    /// Read a named cookie back out of the shared jar.
    pub fn cookie_value(&self, url: &str, name: &str) -> Option<String> {
        let url: Url = url.parse().ok()?;
        let header = self.jar.cookies(&url)?;
        let header = header.to_str().ok()?;
        header.split(';').map(str::trim).find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == name && !value.is_empty()).then(|| value.to_string())
        })
    }

    /// Inject a named cookie so subsequent requests to this host carry it.
    pub fn set_cookie(&self, url: &str, name: &str, value: &str) {
        if let Ok(url) = url.parse::<Url>() {
            self.jar
                .add_cookie_str(&format!("{}={}; Path=/", name, value), &url);
        }
    }

    pub fn metrics(&self) -> &MetricsTracker {
        &self.metrics
    }
}

async fn into_text(response: Response) -> Result<TextResponse, HttpError> {
    let url = response.url().clone();
    let status = response.status();
    let body = response.text().await.map_err(HttpError::Transport)?;
    Ok(TextResponse { url, status, body })
}

fn endpoint_label(url: &str) -> String {
    url.parse::<Url>()
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}
