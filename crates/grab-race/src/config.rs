//! # Race Configuration
//!
//! Configuration management for the race engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Command-line flags (highest priority, applied by the binary)       │
//! │                                                                         │
//! │  2. Environment Variables                                              │
//! │     GRAB_CONCURRENCY=8                                                 │
//! │     GRAB_NTP_SERVER=ntp.example.org:123                                │
//! │                                                                         │
//! │  3. TOML Config File                                                   │
//! │     ~/.config/lesson-grab/grab.toml (Linux)                            │
//! │     ~/Library/Application Support/edu.lesson-grab.grab/grab.toml       │
//! │                                                                         │
//! │  4. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # grab.toml
//! [service]
//! base_url = "https://jw.ahu.edu.cn"
//! request_timeout_ms = 5000
//!
//! [race]
//! concurrency = 4
//! lead_in_secs = 5
//! overrun_secs = 180
//!
//! [poll]
//! intent_max_polls = 8
//! intent_interval_ms = 150
//! confirm_max_polls = 10
//! confirm_interval_ms = 200
//!
//! [clock]
//! server = "ntp.aliyun.com:123"
//! samples = 3
//!
//! [files]
//! credentials = "credentials.json"
//! targets = "list.json"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use grab_core::RacePolicy;

use crate::clock::SyncPolicy;
use crate::error::{RaceError, RaceResult};
use crate::poll::PollPolicy;
use crate::workflow::WorkflowPolicy;

// =============================================================================
// Service Settings
// =============================================================================

/// Where the enrollment service lives and how long a single call may take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Scheme and host of the service.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path prefix of the course-selection API.
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Turn id used to look up the current selection period.
    #[serde(default = "default_turn_probe_id")]
    pub turn_probe_id: i64,

    /// Per-request timeout (milliseconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_base_url() -> String {
    "https://jw.ahu.edu.cn".to_string()
}

fn default_api_prefix() -> String {
    "/course-selection-api/api/v1/student/course-select".to_string()
}

fn default_turn_probe_id() -> i64 {
    741
}

fn default_request_timeout() -> u64 {
    5000
}

impl Default for ServiceSettings {
    fn default() -> Self {
        ServiceSettings {
            base_url: default_base_url(),
            api_prefix: default_api_prefix(),
            turn_probe_id: default_turn_probe_id(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl ServiceSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Full API base, e.g. `https://host/course-selection-api/...`.
    pub fn api_base(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.api_prefix.trim_matches('/')
        )
    }
}

// =============================================================================
// Race Settings
// =============================================================================

/// Timing and concurrency of each race.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceSettings {
    /// Maximum in-flight attempts per race.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Attempts may start this many seconds before the target time.
    #[serde(default = "default_lead_in")]
    pub lead_in_secs: u64,

    /// Attempts keep launching this long after `max(target, now)`.
    #[serde(default = "default_overrun")]
    pub overrun_secs: u64,

    /// Status line refresh while waiting for the window (milliseconds).
    #[serde(default = "default_status_refresh")]
    pub status_refresh_ms: u64,

    /// Session is rechecked this many seconds before the target time.
    #[serde(default = "default_verify_lead")]
    pub verify_lead_secs: u64,

    /// Keep racing lower-priority targets after a win.
    #[serde(default)]
    pub continue_after_success: bool,
}

fn default_concurrency() -> usize {
    4
}

fn default_lead_in() -> u64 {
    5
}

fn default_overrun() -> u64 {
    180
}

fn default_status_refresh() -> u64 {
    1000
}

fn default_verify_lead() -> u64 {
    180
}

impl Default for RaceSettings {
    fn default() -> Self {
        RaceSettings {
            concurrency: default_concurrency(),
            lead_in_secs: default_lead_in(),
            overrun_secs: default_overrun(),
            status_refresh_ms: default_status_refresh(),
            verify_lead_secs: default_verify_lead(),
            continue_after_success: false,
        }
    }
}

// =============================================================================
// Poll Settings
// =============================================================================

/// Bounded retry budgets for the two poll stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    #[serde(default = "default_intent_polls")]
    pub intent_max_polls: u32,

    #[serde(default = "default_intent_interval")]
    pub intent_interval_ms: u64,

    #[serde(default = "default_confirm_polls")]
    pub confirm_max_polls: u32,

    #[serde(default = "default_confirm_interval")]
    pub confirm_interval_ms: u64,
}

fn default_intent_polls() -> u32 {
    8
}

fn default_intent_interval() -> u64 {
    150
}

fn default_confirm_polls() -> u32 {
    10
}

fn default_confirm_interval() -> u64 {
    200
}

impl Default for PollSettings {
    fn default() -> Self {
        PollSettings {
            intent_max_polls: default_intent_polls(),
            intent_interval_ms: default_intent_interval(),
            confirm_max_polls: default_confirm_polls(),
            confirm_interval_ms: default_confirm_interval(),
        }
    }
}

// =============================================================================
// Clock Settings
// =============================================================================

/// Trusted time source sampling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockSettings {
    /// SNTP server, `host:port`.
    #[serde(default = "default_ntp_server")]
    pub server: String,

    #[serde(default = "default_samples")]
    pub samples: u32,

    /// Pause between samples (milliseconds).
    #[serde(default = "default_sample_gap")]
    pub sample_gap_ms: u64,

    /// Per-sample timeout (milliseconds).
    #[serde(default = "default_sample_timeout")]
    pub sample_timeout_ms: u64,
}

fn default_ntp_server() -> String {
    "ntp.aliyun.com:123".to_string()
}

fn default_samples() -> u32 {
    3
}

fn default_sample_gap() -> u64 {
    500
}

fn default_sample_timeout() -> u64 {
    5000
}

impl Default for ClockSettings {
    fn default() -> Self {
        ClockSettings {
            server: default_ntp_server(),
            samples: default_samples(),
            sample_gap_ms: default_sample_gap(),
            sample_timeout_ms: default_sample_timeout(),
        }
    }
}

// =============================================================================
// File Settings
// =============================================================================

/// Locations of the operator-supplied JSON files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSettings {
    #[serde(default = "default_credentials_file")]
    pub credentials: PathBuf,

    #[serde(default = "default_targets_file")]
    pub targets: PathBuf,
}

fn default_credentials_file() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_targets_file() -> PathBuf {
    PathBuf::from("list.json")
}

impl Default for FileSettings {
    fn default() -> Self {
        FileSettings {
            credentials: default_credentials_file(),
            targets: default_targets_file(),
        }
    }
}

// =============================================================================
// Main Race Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceConfig {
    #[serde(default)]
    pub service: ServiceSettings,

    #[serde(default)]
    pub race: RaceSettings,

    #[serde(default)]
    pub poll: PollSettings,

    #[serde(default)]
    pub clock: ClockSettings,

    #[serde(default)]
    pub files: FileSettings,
}

impl RaceConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (grab.toml)
    /// 3. Environment variables
    ///
    /// The result is not validated. Callers layer their own overrides on
    /// top and then call [`RaceConfig::validate`] once.
    pub fn load(config_path: Option<PathBuf>) -> RaceResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading race config from file");
                let contents = std::fs::read_to_string(&path).map_err(|e| {
                    RaceError::ConfigLoadFailed(format!("{}: {}", path.display(), e))
                })?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> RaceResult<()> {
        let url = url::Url::parse(&self.service.base_url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(RaceError::InvalidUrl(format!(
                "Service URL must start with http:// or https://, got: {}",
                self.service.base_url
            )));
        }

        if self.race.concurrency == 0 {
            return Err(RaceError::InvalidConfig(
                "concurrency must be greater than 0".into(),
            ));
        }

        if self.poll.intent_max_polls == 0 || self.poll.confirm_max_polls == 0 {
            return Err(RaceError::InvalidConfig(
                "poll budgets must be greater than 0".into(),
            ));
        }

        if self.clock.samples == 0 {
            return Err(RaceError::InvalidConfig(
                "clock samples must be greater than 0".into(),
            ));
        }

        if self.service.request_timeout_ms == 0 {
            return Err(RaceError::InvalidConfig(
                "request_timeout_ms must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies `GRAB_*` environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("GRAB_BASE_URL") {
            debug!(url = %url, "Overriding service URL from environment");
            self.service.base_url = url;
        }

        if let Some(value) = lookup("GRAB_CONCURRENCY") {
            match value.parse::<usize>() {
                Ok(n) => self.race.concurrency = n,
                Err(_) => warn!(value = %value, "Ignoring unparsable GRAB_CONCURRENCY"),
            }
        }

        if let Some(value) = lookup("GRAB_OVERRUN_SECS") {
            if let Ok(secs) = value.parse::<u64>() {
                self.race.overrun_secs = secs;
            }
        }

        if let Some(value) = lookup("GRAB_CONTINUE_AFTER_SUCCESS") {
            self.race.continue_after_success =
                matches!(value.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        if let Some(server) = lookup("GRAB_NTP_SERVER") {
            debug!(server = %server, "Overriding clock server from environment");
            self.clock.server = server;
        }

        if let Some(path) = lookup("GRAB_CREDENTIALS") {
            self.files.credentials = PathBuf::from(path);
        }

        if let Some(path) = lookup("GRAB_TARGETS") {
            self.files.targets = PathBuf::from(path);
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("edu", "lesson-grab", "grab")
            .map(|dirs| dirs.config_dir().join("grab.toml"))
    }

    // =========================================================================
    // Typed Policies
    // =========================================================================

    pub fn race_policy(&self) -> RaceResult<RacePolicy> {
        Ok(RacePolicy::new(
            Duration::from_secs(self.race.lead_in_secs),
            Duration::from_secs(self.race.overrun_secs),
            self.race.concurrency,
        )?)
    }

    pub fn workflow_policy(&self) -> WorkflowPolicy {
        let call_timeout = self.service.request_timeout();
        WorkflowPolicy {
            request_timeout: call_timeout,
            intent: PollPolicy {
                max_polls: self.poll.intent_max_polls,
                interval: Duration::from_millis(self.poll.intent_interval_ms),
                call_timeout,
            },
            confirm: PollPolicy {
                max_polls: self.poll.confirm_max_polls,
                interval: Duration::from_millis(self.poll.confirm_interval_ms),
                call_timeout,
            },
        }
    }

    pub fn sync_policy(&self) -> SyncPolicy {
        SyncPolicy {
            samples: self.clock.samples,
            sample_gap: Duration::from_millis(self.clock.sample_gap_ms),
            sample_timeout: Duration::from_millis(self.clock.sample_timeout_ms),
        }
    }

    pub fn status_refresh(&self) -> Duration {
        Duration::from_millis(self.race.status_refresh_ms)
    }

    pub fn verify_lead(&self) -> Duration {
        Duration::from_secs(self.race.verify_lead_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RaceConfig::default();
        assert_eq!(config.race.concurrency, 4);
        assert_eq!(config.race.lead_in_secs, 5);
        assert_eq!(config.race.overrun_secs, 180);
        assert_eq!(config.poll.intent_max_polls, 8);
        assert_eq!(config.poll.confirm_interval_ms, 200);
        assert_eq!(config.clock.server, "ntp.aliyun.com:123");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: RaceConfig = toml::from_str(
            r#"
            [race]
            concurrency = 8

            [clock]
            samples = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.race.concurrency, 8);
        assert_eq!(config.race.overrun_secs, 180);
        assert_eq!(config.clock.samples, 5);
        assert_eq!(config.service.turn_probe_id, 741);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = RaceConfig::default();
        config.race.concurrency = 0;
        let err = config.validate().unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_validate_rejects_non_http_url() {
        let mut config = RaceConfig::default();
        config.service.base_url = "ftp://jw.ahu.edu.cn".into();
        assert!(matches!(config.validate(), Err(RaceError::InvalidUrl(_))));
    }

    #[test]
    fn test_overrides() {
        let mut config = RaceConfig::default();
        config.apply_overrides_from(|key| match key {
            "GRAB_CONCURRENCY" => Some("6".into()),
            "GRAB_CONTINUE_AFTER_SUCCESS" => Some("yes".into()),
            "GRAB_NTP_SERVER" => Some("time.example.org:123".into()),
            "GRAB_TARGETS" => Some("/tmp/targets.json".into()),
            _ => None,
        });
        assert_eq!(config.race.concurrency, 6);
        assert!(config.race.continue_after_success);
        assert_eq!(config.clock.server, "time.example.org:123");
        assert_eq!(config.files.targets, PathBuf::from("/tmp/targets.json"));
    }

    #[test]
    fn test_api_base_joins_cleanly() {
        let mut service = ServiceSettings::default();
        service.base_url = "https://host.example/".into();
        assert_eq!(
            service.api_base(),
            "https://host.example/course-selection-api/api/v1/student/course-select"
        );
    }

    #[test]
    fn test_typed_policies() {
        let config = RaceConfig::default();
        let workflow = config.workflow_policy();
        assert_eq!(workflow.intent.max_polls, 8);
        assert_eq!(workflow.intent.interval, Duration::from_millis(150));
        assert_eq!(workflow.confirm.call_timeout, Duration::from_secs(5));
        assert_eq!(config.race_policy().unwrap().concurrency, 4);
        assert_eq!(config.sync_policy().samples, 3);
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("grab-config-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_invalid_file_value_can_be_overridden_before_validation() {
        let dir = scratch_dir("override");
        let path = dir.join("grab.toml");
        std::fs::write(&path, "[race]\nconcurrency = 0\n").unwrap();

        let mut config = RaceConfig::load(Some(path)).unwrap();
        assert_eq!(config.race.concurrency, 0);
        assert!(config.validate().is_err());

        // what the binary does with -k 4
        config.race.concurrency = 4;
        assert!(config.validate().is_ok());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_unreadable_file_names_the_path() {
        // a directory exists but cannot be read as a file
        let dir = scratch_dir("unreadable");

        let err = RaceConfig::load(Some(dir.clone())).unwrap_err();

        match err {
            RaceError::ConfigLoadFailed(message) => {
                assert!(message.contains(&dir.display().to_string()))
            }
            other => panic!("unexpected error: {:?}", other),
        }
        let _ = std::fs::remove_dir_all(dir);
    }
}
