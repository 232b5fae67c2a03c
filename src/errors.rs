//! Error taxonomy for the license checker
//!
//! Parsing and protocol errors are terminal for a single refresh attempt;
//! transport errors are retried inside the HTTP client. The worker maps all
//! of them to a persisted license result at its boundary instead of
//! propagating them to the caller.

use thiserror::Error;

use crate::models::LicenseStatus;

/// Transport-level failure after the retry budget is spent, or an
/// unparseable response body.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid JSON response from {url}")]
    InvalidJson { url: String },
}

#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("captcha reported unsolvable")]
    Unsolvable,
    #[error("captcha not solved after {attempts} attempts")]
    Timeout { attempts: usize },
    #[error("captcha vendor error: {0}")]
    Vendor(String),
    #[error(transparent)]
    Http(#[from] HttpError),
}

/// One failed step of the login handshake. Every variant is terminal for
/// that refresh attempt; none is retried internally.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("recaptcha site key not found on login page")]
    SiteKeyMissing,
    #[error("portal rejected the captcha solution")]
    CaptchaRejected,
    #[error("portal rejected the login: {0}")]
    LoginRejected(String),
    #[error("login accepted but premium access is unavailable")]
    PremiumExpired,
    #[error("session cookie missing after login")]
    SessionCookieMissing,
    #[error(transparent)]
    Captcha(#[from] CaptchaError),
    #[error(transparent)]
    Http(#[from] HttpError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Failure of a single license lookup, labeled by root cause so the
/// worker boundary can count auth, captcha, transport and store failures
/// separately.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WorkerError {
    pub fn label(&self) -> &'static str {
        match self {
            WorkerError::Auth(AuthError::Captcha(CaptchaError::Http(_))) => "transport",
            WorkerError::Auth(AuthError::Captcha(_)) => "captcha",
            WorkerError::Auth(AuthError::Http(_)) => "transport",
            WorkerError::Auth(_) => "auth",
            WorkerError::Http(_) => "transport",
            WorkerError::Store(_) => "store",
        }
    }

    /// Status persisted when a lookup dies on this error. A failed login
    /// means the session could not be established; anything else is an
    /// unclassified failure.
    pub fn fallback_status(&self) -> LicenseStatus {
        match self {
            WorkerError::Auth(_) => LicenseStatus::NotAuthorized,
            WorkerError::Http(_) | WorkerError::Store(_) => LicenseStatus::Error,
        }
    }
}
