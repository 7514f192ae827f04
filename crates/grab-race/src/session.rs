//! # Session Handle
//!
//! An immutable, already-authenticated view of the service.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   credentials.json ──► Credentials ──► Session::establish               │
//! │                                          │  GET {student}/turn/741/select│
//! │                                          │  (exponential backoff)        │
//! │                                          ▼                              │
//! │                                   Arc<Session> ◄── shared read-only by  │
//! │                                          │         every Attempt        │
//! │                          between races   ▼                              │
//! │                                   Session::refreshed ──► new Arc        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Headers and cookies are fixed when the handle is built. A refresh
//! produces a new handle; nothing is mutated in place.

use std::path::Path;
use std::time::Duration;

use backoff::ExponentialBackoff;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, COOKIE, ORIGIN, REFERER};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api::{Envelope, TurnData};
use crate::client::fetch_envelope;
use crate::config::ServiceSettings;
use crate::error::{RaceError, RaceResult};

const TOKEN_COOKIE: &str = "cs-course-select-student-token";
const STUDENT_COOKIE: &str = "cs-course-select-student-id";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/98.0.4758.82 Safari/537.36";

/// Total time spent retrying the turn probe before giving up.
const ESTABLISH_BUDGET: Duration = Duration::from_secs(20);

// =============================================================================
// Credentials
// =============================================================================

/// Student token and id, as stored in `credentials.json`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub token: String,
    pub student_id: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .field("student_id", &self.student_id)
            .finish()
    }
}

impl Credentials {
    pub fn new(token: impl Into<String>, student_id: impl Into<String>) -> RaceResult<Self> {
        let credentials = Credentials {
            token: token.into().trim().to_string(),
            student_id: student_id.into().trim().to_string(),
        };
        credentials.student_number()?;
        if credentials.token.is_empty() {
            return Err(RaceError::MissingCredentials("token is empty".into()));
        }
        Ok(credentials)
    }

    /// Reads and validates a credentials file.
    pub fn load(path: &Path) -> RaceResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RaceError::MissingCredentials(format!("{}: {}", path.display(), e))
        })?;
        let raw: Credentials = serde_json::from_str(&contents).map_err(|e| {
            RaceError::MissingCredentials(format!("{}: {}", path.display(), e))
        })?;
        let credentials = Credentials::new(raw.token, raw.student_id)?;
        info!(student_id = %credentials.student_id, "Credentials loaded");
        Ok(credentials)
    }

    pub fn save(&self, path: &Path) -> RaceResult<()> {
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| RaceError::CredentialsSaveFailed(e.to_string()))?;
        std::fs::write(path, contents)
            .map_err(|e| RaceError::CredentialsSaveFailed(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), "Credentials saved");
        Ok(())
    }

    /// Numeric student id, as the request bodies carry it.
    pub fn student_number(&self) -> RaceResult<i64> {
        self.student_id.parse::<i64>().map_err(|_| {
            RaceError::MissingCredentials(format!(
                "student id must be numeric, got '{}'",
                self.student_id
            ))
        })
    }
}

// =============================================================================
// Turn Info
// =============================================================================

/// The currently open selection period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnInfo {
    pub turn_id: i64,
    pub turn_name: String,
    pub semester_id: i64,
    pub semester_name: String,
}

impl From<TurnData> for TurnInfo {
    fn from(data: TurnData) -> Self {
        TurnInfo {
            turn_id: data.turn.id,
            turn_name: data.turn.name,
            semester_id: data.semester.id,
            semester_name: data.semester.name_zh,
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// Immutable authenticated handle.
#[derive(Debug, Clone)]
pub struct Session {
    client: reqwest::Client,
    credentials: Credentials,
    student: i64,
    turn: TurnInfo,
    api_base: String,
}

impl Session {
    /// Builds the HTTP client and probes the current selection period.
    ///
    /// Transient failures are retried with exponential backoff. HTTP 401/403
    /// means the credentials are no good; any other rejection is returned
    /// as is.
    pub async fn establish(credentials: Credentials, settings: &ServiceSettings) -> RaceResult<Self> {
        let student = credentials.student_number()?;
        let client = build_client(&credentials, settings)?;
        let api_base = settings.api_base();
        url::Url::parse(&api_base)?;

        let probe_url = format!(
            "{}/{}/turn/{}/select",
            api_base, credentials.student_id, settings.turn_probe_id
        );

        let limit = settings.request_timeout();
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(5),
            multiplier: 2.0,
            max_elapsed_time: Some(ESTABLISH_BUDGET),
            ..Default::default()
        };

        let turn = backoff::future::retry(policy, || async {
            fetch_turn(&client, &probe_url, limit).await.map_err(|e| {
                if e.is_retryable() {
                    warn!(error = %e, "Turn probe failed, retrying");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await
        .map_err(auth_failure)?;

        info!(
            turn_id = turn.turn_id,
            turn = %turn.turn_name,
            semester = %turn.semester_name,
            "Session established"
        );

        Ok(Session {
            client,
            credentials,
            student,
            turn,
            api_base,
        })
    }

    /// A new handle built from the same credentials.
    pub async fn refreshed(&self, settings: &ServiceSettings) -> RaceResult<Self> {
        debug!(student_id = %self.credentials.student_id, "Refreshing session");
        Session::establish(self.credentials.clone(), settings).await
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn student(&self) -> i64 {
        self.student
    }

    pub fn turn(&self) -> &TurnInfo {
        &self.turn
    }

    /// `{api_base}/{path}`.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }
}

async fn fetch_turn(client: &reqwest::Client, url: &str, limit: Duration) -> RaceResult<TurnInfo> {
    let envelope: Envelope<TurnData> = fetch_envelope(client.get(url), limit).await?;
    let data = envelope.into_data()?.ok_or_else(|| RaceError::Rejected {
        code: 0,
        message: "no selection period open".into(),
    })?;
    Ok(data.into())
}

/// Only an HTTP auth refusal condemns the credentials. A non-zero result
/// (busy, no open period) stays a plain rejection.
fn auth_failure(err: RaceError) -> RaceError {
    match err {
        RaceError::Status(code @ (401 | 403)) => {
            RaceError::CredentialsRejected(format!("HTTP {}", code))
        }
        other => other,
    }
}

/// Client with the browser-equivalent default headers.
fn build_client(credentials: &Credentials, settings: &ServiceSettings) -> RaceResult<reqwest::Client> {
    let base = settings.base_url.trim_end_matches('/');
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, header_value(&credentials.token)?);
    headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("zh-CN,zh;q=0.9"));
    headers.insert(ORIGIN, header_value(base)?);
    headers.insert(REFERER, header_value(&format!("{}/course-selection/", base))?);
    headers.insert(
        COOKIE,
        header_value(&format!(
            "{}={}; {}={}",
            TOKEN_COOKIE, credentials.token, STUDENT_COOKIE, credentials.student_id
        ))?,
    );

    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .timeout(settings.request_timeout())
        .build()
        .map_err(|e| RaceError::InvalidConfig(format!("HTTP client: {}", e)))
}

fn header_value(value: &str) -> RaceResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| RaceError::MissingCredentials("value is not a valid HTTP header".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{serve_json, serve_silence};

    #[test]
    fn test_credentials_validation() {
        assert!(Credentials::new("tok", "2023001").is_ok());
        assert!(matches!(
            Credentials::new("tok", "abc"),
            Err(RaceError::MissingCredentials(_))
        ));
        assert!(matches!(
            Credentials::new("  ", "2023001"),
            Err(RaceError::MissingCredentials(_))
        ));
    }

    #[test]
    fn test_credentials_debug_redacts_token() {
        let credentials = Credentials::new("secret-token", "2023001").unwrap();
        let printed = format!("{:?}", credentials);
        assert!(!printed.contains("secret-token"));
        assert!(printed.contains("2023001"));
    }

    #[test]
    fn test_credentials_file_roundtrip() {
        let path = std::env::temp_dir().join(format!("grab-creds-{}.json", std::process::id()));
        let credentials = Credentials::new("tok", "2023001").unwrap();
        credentials.save(&path).unwrap();
        assert_eq!(Credentials::load(&path).unwrap(), credentials);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_missing_credentials_file_is_config_error() {
        let err = Credentials::load(Path::new("/nonexistent/credentials.json")).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_save_failure_names_credentials() {
        let credentials = Credentials::new("tok", "2023001").unwrap();
        let err = credentials
            .save(Path::new("/nonexistent/grab/credentials.json"))
            .unwrap_err();
        assert!(matches!(err, RaceError::CredentialsSaveFailed(_)));
        assert!(err.to_string().starts_with("Failed to save credentials"));
    }

    fn settings(base_url: String, timeout_ms: u64) -> ServiceSettings {
        ServiceSettings {
            base_url,
            request_timeout_ms: timeout_ms,
            ..ServiceSettings::default()
        }
    }

    #[tokio::test]
    async fn test_busy_service_is_not_a_credentials_failure() {
        let base = serve_json(200, r#"{"result":1,"message":"系统繁忙，请稍后再试","data":null}"#).await;
        let credentials = Credentials::new("tok", "2023001").unwrap();

        let err = Session::establish(credentials, &settings(base, 2000))
            .await
            .unwrap_err();

        assert!(matches!(err, RaceError::Rejected { code: 1, .. }));
        assert!(!err.is_config_error());
    }

    #[tokio::test]
    async fn test_no_open_period_is_not_a_credentials_failure() {
        let base = serve_json(200, r#"{"result":0,"message":null,"data":null}"#).await;
        let credentials = Credentials::new("tok", "2023001").unwrap();

        let err = Session::establish(credentials, &settings(base, 2000))
            .await
            .unwrap_err();

        assert!(!err.is_config_error());
    }

    #[tokio::test]
    async fn test_unauthorized_rejects_credentials() {
        let base = serve_json(401, r#"{}"#).await;
        let credentials = Credentials::new("tok", "2023001").unwrap();

        let err = Session::establish(credentials, &settings(base, 2000))
            .await
            .unwrap_err();

        assert!(matches!(err, RaceError::CredentialsRejected(_)));
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_timeout_reports_configured_limit() {
        let base = serve_silence().await;
        let credentials = Credentials::new("tok", "2023001").unwrap();
        let client = build_client(&credentials, &settings(base.clone(), 200)).unwrap();

        let err = fetch_turn(&client, &format!("{}/probe", base), Duration::from_millis(200))
            .await
            .unwrap_err();

        assert!(matches!(err, RaceError::Timeout(200)));
        assert_eq!(err.to_string(), "Timed out after 200 ms");
    }

    #[test]
    fn test_client_rejects_header_injection() {
        let credentials = Credentials {
            token: "bad\ntoken".into(),
            student_id: "1".into(),
        };
        assert!(build_client(&credentials, &ServiceSettings::default()).is_err());
    }
}
