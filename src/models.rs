use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classified outcome of a remote license lookup.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LicenseStatus {
    /// A matching license record was found
    Ok,
    /// Task created, lookup still running
    Pending,
    /// The portal reported "not logged in"; the session cookie is stale or absent
    NotAuthorized,
    /// The user/script pair does not exist on the portal
    CredsNotFound,
    /// Any other unhandled failure
    Error,
}

impl LicenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseStatus::Ok => "ok",
            LicenseStatus::Pending => "pending",
            LicenseStatus::NotAuthorized => "not_authorized",
            LicenseStatus::CredsNotFound => "creds_not_found",
            LicenseStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<LicenseStatus> {
        match s {
            "ok" => Some(LicenseStatus::Ok),
            "pending" => Some(LicenseStatus::Pending),
            "not_authorized" => Some(LicenseStatus::NotAuthorized),
            "creds_not_found" => Some(LicenseStatus::CredsNotFound),
            "error" => Some(LicenseStatus::Error),
            _ => None,
        }
    }
}

/// Persisted result of one lookup. The expiry fields are both present only
/// when `status == Ok`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LicenseOutcome {
    pub status: LicenseStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_expired: Option<bool>,
}

impl LicenseOutcome {
    pub fn status_only(status: LicenseStatus) -> Self {
        Self {
            status,
            expires_at: None,
            is_expired: None,
        }
    }

    pub fn ok(expires_at: DateTime<Utc>, is_expired: bool) -> Self {
        Self {
            status: LicenseStatus::Ok,
            expires_at: Some(expires_at),
            is_expired: Some(is_expired),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CreateTaskRequest {
    pub username: String,
    pub script_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub task_id: String,
    pub credentials: CreateTaskRequest,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskResultRequest {
    pub task_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LicenseDetails {
    pub expires_in: DateTime<Utc>,
    pub is_expired: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskResultResponse {
    pub status: LicenseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<LicenseDetails>,
}

impl From<LicenseOutcome> for TaskResultResponse {
    fn from(outcome: LicenseOutcome) -> Self {
        let credentials = match (outcome.expires_at, outcome.is_expired) {
            (Some(expires_in), Some(is_expired)) => Some(LicenseDetails {
                expires_in,
                is_expired,
            }),
            _ => None,
        };
        Self {
            status: outcome.status,
            credentials,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            LicenseStatus::Ok,
            LicenseStatus::Pending,
            LicenseStatus::NotAuthorized,
            LicenseStatus::CredsNotFound,
            LicenseStatus::Error,
        ] {
            assert_eq!(LicenseStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(LicenseStatus::parse("bogus"), None);
    }

    #[test]
    fn test_status_serde_snake_case() {
        let json = serde_json::to_string(&LicenseStatus::CredsNotFound).unwrap();
        assert_eq!(json, "\"creds_not_found\"");
    }

    #[test]
    fn test_result_response_drops_partial_expiry() {
        let outcome = LicenseOutcome::status_only(LicenseStatus::NotAuthorized);
        let response = TaskResultResponse::from(outcome);
        assert!(response.credentials.is_none());

        let outcome = LicenseOutcome::ok(Utc::now(), false);
        let response = TaskResultResponse::from(outcome);
        assert!(response.credentials.is_some());
    }
}
