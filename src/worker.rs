//! Session coordinator for license lookups
//!
//! All in-flight lookups share one cached portal session. When the portal
//! rejects it, exactly one caller re-runs the login handshake; everyone
//! else waits for that attempt to finish and then retries with whatever
//! session it produced. Login burns a paid, slow captcha solve, so the
//! single-flight guarantee is the point of this module.
//!
//! The shared state is one `Option<token>` plus a generation counter,
//! both behind a single async mutex. The counter is what tells a waiter
//! "a refresh already completed while you were blocked" apart from "you
//! are the one who should refresh".

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::auth::AuthClient;
use crate::config::Config;
use crate::errors::WorkerError;
use crate::http_client::HttpClient;
use crate::license::LicenseApiClient;
use crate::metrics::MetricsTracker;
use crate::models::{LicenseOutcome, LicenseStatus};
use crate::solver::CaptchaSolver;
use crate::store::TaskStore;

#[derive(Default)]
struct SessionState {
    token: Option<String>,
    /// Bumped at the start of every refresh attempt, success or failure.
    epoch: u64,
}

pub struct LicenseWorker {
    auth: AuthClient,
    api: LicenseApiClient,
    store: Arc<dyn TaskStore>,
    metrics: MetricsTracker,
    state: Mutex<SessionState>,
    max_refresh_attempts: u32,
}

impl LicenseWorker {
    pub fn new(
        config: &Config,
        http: Arc<HttpClient>,
        solver: Arc<dyn CaptchaSolver>,
        store: Arc<dyn TaskStore>,
        metrics: MetricsTracker,
    ) -> Self {
        Self {
            auth: AuthClient::new(http.clone(), solver, &config.portal),
            api: LicenseApiClient::new(http, &config.portal),
            store,
            metrics,
            state: Mutex::new(SessionState::default()),
            max_refresh_attempts: config.worker.max_refresh_attempts,
        }
    }

    /// Run one lookup to completion and persist its result. Never
    /// propagates an error: a failed lookup is written as the best-effort
    /// status its failure kind maps to.
    pub async fn run(&self, task_id: &str, user: &str, script: &str) {
        let outcome = match self.lookup(user, script).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!(
                    "Lookup for task {} failed ({}): {}",
                    task_id,
                    e.label(),
                    e
                );
                LicenseOutcome::status_only(e.fallback_status())
            }
        };

        if let Err(e) = self.store.write_license_result(task_id, &outcome).await {
            log::error!("Failed to persist result for task {}: {}", task_id, e);
        }
    }

    /// The typed half of the worker: query, refresh on rejection, requery.
    pub async fn lookup(&self, user: &str, script: &str) -> Result<LicenseOutcome, WorkerError> {
        let mut epoch = self.prepare_session().await?;
        let mut rounds = 0;
        loop {
            let outcome = self.api.fetch_license(user, script).await?;
            if outcome.status != LicenseStatus::NotAuthorized || rounds >= self.max_refresh_attempts
            {
                return Ok(outcome);
            }
            rounds += 1;
            epoch = self.refresh_session(epoch).await?;
        }
    }

    /// Warm start: adopt a previously persisted session if this instance
    /// has none yet. Returns the current refresh epoch.
    async fn prepare_session(&self) -> Result<u64, WorkerError> {
        {
            let state = self.state.lock().await;
            if state.token.is_some() {
                return Ok(state.epoch);
            }
        }

        // Store read happens outside the lock; it may be slow
        let stored = self.store.read_session().await?;

        let mut state = self.state.lock().await;
        if state.token.is_none() {
            if let Some(token) = stored {
                log::info!("Adopting persisted portal session");
                self.api.set_session_cookie(&token);
                state.token = Some(token);
            }
        }
        Ok(state.epoch)
    }

    /// Single-flight session refresh. `observed_epoch` is the epoch the
    /// caller held when the portal rejected its session; if a refresh
    /// completed since then, the caller gets the new state without
    /// authenticating again. Holding the lock across the login call is
    /// what serializes concurrent refreshes.
    async fn refresh_session(&self, observed_epoch: u64) -> Result<u64, WorkerError> {
        let mut state = self.state.lock().await;
        if state.epoch != observed_epoch {
            return Ok(state.epoch);
        }

        state.epoch += 1;
        state.token = None;
        log::info!("Refreshing portal session");

        match self.auth.fetch_session_cookie().await {
            Ok(token) => {
                self.api.set_session_cookie(&token);
                if let Err(e) = self.store.write_session(&token).await {
                    log::warn!("Failed to persist refreshed session: {}", e);
                }
                state.token = Some(token);
                Ok(state.epoch)
            }
            Err(e) => {
                let error = WorkerError::Auth(e);
                self.metrics.record_refresh_failure(error.label());
                log::error!("Portal session refresh failed: {}", error);
                Err(error)
            }
        }
    }
}
