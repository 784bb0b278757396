//! Typed configuration for the Vigil inspection agent (§6's configuration
//! key table).
//!
//! Values are loaded from a TOML file with environment-variable overrides
//! (`VIGIL_*`, double-underscore nesting) via the `config` crate, validated
//! with `validator`, and every field carries a default so a missing file
//! still produces a usable configuration.

mod error;
#[cfg(feature = "runtime")]
pub mod watch;

pub use error::ConfigError;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// `HTTP manager → NGINX inspection mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum InspectionMode {
    BlockingThread,
    NonBlockingThread,
    NoThread,
}

impl Default for InspectionMode {
    fn default() -> Self {
        InspectionMode::BlockingThread
    }
}

fn default_registration_ipc_path() -> PathBuf {
    PathBuf::from("/dev/shm/check-point/cp-nano-attachment-registration")
}

fn default_keep_alive_ipc_path() -> PathBuf {
    PathBuf::from("/dev/shm/check-point/cp-nano-attachment-registration-expiration-socket")
}

fn default_shared_settings_path() -> PathBuf {
    PathBuf::from("/dev/shm/cp_nano_http_attachment_conf")
}

fn default_static_resources_path() -> PathBuf {
    PathBuf::from("/dev/shm/static_resources")
}

fn default_ring_base_dir() -> PathBuf {
    PathBuf::from("/dev/shm/check-point/rings")
}

fn default_true() -> bool {
    true
}

const fn default_processing_timeout_ms() -> u64 {
    3_000
}

const fn default_metric_reporting_interval_secs() -> u64 {
    60
}

const fn default_expiration_check_seconds() -> u64 {
    300
}

const fn default_ring_capacity_per_worker() -> u32 {
    200
}

const fn default_max_registrations_allowed() -> u32 {
    6
}

const fn default_allowed_duration_of_registrations_secs() -> u64 {
    20
}

/// Rate limit on worker re-registration attempts (§4.7): at most
/// `max_registrations_allowed` within a rolling `allowed_duration` window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Validate)]
pub struct RegistrationRateLimitConfig {
    #[serde(default = "default_max_registrations_allowed")]
    #[validate(range(min = 1))]
    pub max_registrations_allowed: u32,

    #[serde(default = "default_allowed_duration_of_registrations_secs")]
    #[validate(range(min = 1))]
    pub allowed_duration_of_registrations_secs: u64,
}

impl Default for RegistrationRateLimitConfig {
    fn default() -> Self {
        RegistrationRateLimitConfig {
            max_registrations_allowed: default_max_registrations_allowed(),
            allowed_duration_of_registrations_secs: default_allowed_duration_of_registrations_secs(
            ),
        }
    }
}

fn default_jwt_claim_fields() -> Vec<String> {
    vec!["sub".to_string()]
}

fn default_tenant_header() -> String {
    "x-tenant-id".to_string()
}

/// Priority list and per-kind parameters for the source-identifier resolver
/// (§4.8). `custom_headers` are tried first, in list order, before the
/// built-in `authorization` / `x-forwarded-for` / `cookie` kinds.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SourceIdentifierConfig {
    /// User-defined custom header keys, highest priority first.
    #[serde(default)]
    pub custom_headers: Vec<String>,

    /// JWT claim field names tried in order against the `authorization`
    /// bearer payload; the resolver stops at the first one present.
    #[serde(default = "default_jwt_claim_fields")]
    pub jwt_claim_fields: Vec<String>,

    /// CIDR trust list for `X-Forwarded-For`; empty means "trust all".
    #[serde(default)]
    pub xff_trusted_cidrs: Vec<String>,

    /// Additional cookie keys to look for, beyond the built-in
    /// `_oauth2_proxy` and `jsessionid`.
    #[serde(default)]
    pub cookie_keys: Vec<String>,
}

impl Default for SourceIdentifierConfig {
    fn default() -> Self {
        SourceIdentifierConfig {
            custom_headers: Vec::new(),
            jwt_claim_fields: default_jwt_claim_fields(),
            xff_trusted_cidrs: Vec::new(),
            cookie_keys: Vec::new(),
        }
    }
}

/// The complete, validated intake configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IntakeConfig {
    /// `Attachment Registration → Registration IPC Path`.
    #[serde(default = "default_registration_ipc_path")]
    pub registration_ipc_path: PathBuf,

    /// Keep-alive socket path (§6 filesystem paths); not itself named in
    /// the configuration key table but overridable alongside it.
    #[serde(default = "default_keep_alive_ipc_path")]
    pub keep_alive_ipc_path: PathBuf,

    /// `HTTP manager → Fail Open Mode state`.
    #[serde(default = "default_true")]
    pub fail_open_mode: bool,

    /// `HTTP manager → NGINX response/request processing timeout msec`.
    #[serde(default = "default_processing_timeout_ms")]
    #[validate(range(min = 1))]
    pub processing_timeout_ms: u64,

    /// `HTTP manager → NGINX inspection mode`.
    #[serde(default)]
    pub inspection_mode: InspectionMode,

    /// `HTTP manager → Shared settings path`.
    #[serde(default = "default_shared_settings_path")]
    pub shared_settings_path: PathBuf,

    /// `HTTP manager → Static resources path`.
    #[serde(default = "default_static_resources_path")]
    pub static_resources_path: PathBuf,

    /// Base directory for per-worker shared-memory ring files; not itself
    /// named in the configuration key table but overridable alongside the
    /// other filesystem paths (§6).
    #[serde(default = "default_ring_base_dir")]
    pub ring_base_dir: PathBuf,

    /// `Nginx Attachment → metric reporting interval` (seconds).
    #[serde(default = "default_metric_reporting_interval_secs")]
    #[validate(range(min = 1))]
    pub metric_reporting_interval_secs: u64,

    /// `attachmentRegistrator.expirationCheckSeconds`.
    #[serde(default = "default_expiration_check_seconds")]
    #[validate(range(min = 1))]
    pub expiration_check_seconds: u64,

    /// `nginxAttachment.numOfNginxIpcElements`.
    #[serde(default = "default_ring_capacity_per_worker")]
    #[validate(range(min = 1))]
    pub ring_capacity_per_worker: u32,

    #[serde(default)]
    #[validate(nested)]
    pub registration_rate_limit: RegistrationRateLimitConfig,

    /// Source-identifier resolver priority list and per-kind parameters
    /// (§4.8); not named as a single key in §6's table, but configurable
    /// alongside it.
    #[serde(default)]
    #[validate(nested)]
    pub source_identifiers: SourceIdentifierConfig,

    /// Header key carrying the comma-separated `(tenant, profile)` pair
    /// (§3 "Tenant/profile ids").
    #[serde(default = "default_tenant_header")]
    pub tenant_header: String,

    /// `layer7AccessControl.*` and `agent.config.useLocalIntelligence` are
    /// consumed by external collaborators; the core only forwards them
    /// untouched.
    #[serde(default)]
    pub layer7_access_control: serde_json::Value,

    #[serde(default)]
    pub use_local_intelligence: bool,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        IntakeConfig {
            registration_ipc_path: default_registration_ipc_path(),
            keep_alive_ipc_path: default_keep_alive_ipc_path(),
            fail_open_mode: default_true(),
            processing_timeout_ms: default_processing_timeout_ms(),
            inspection_mode: InspectionMode::default(),
            shared_settings_path: default_shared_settings_path(),
            static_resources_path: default_static_resources_path(),
            ring_base_dir: default_ring_base_dir(),
            metric_reporting_interval_secs: default_metric_reporting_interval_secs(),
            expiration_check_seconds: default_expiration_check_seconds(),
            ring_capacity_per_worker: default_ring_capacity_per_worker(),
            registration_rate_limit: RegistrationRateLimitConfig::default(),
            source_identifiers: SourceIdentifierConfig::default(),
            tenant_header: default_tenant_header(),
            layer7_access_control: serde_json::Value::Null,
            use_local_intelligence: false,
        }
    }
}

impl IntakeConfig {
    /// Loads configuration from `path` (TOML) layered under the built-in
    /// defaults, then applies `VIGIL_`-prefixed environment overrides
    /// (double underscore separates nesting, e.g.
    /// `VIGIL_REGISTRATION_RATE_LIMIT__MAX_REGISTRATIONS_ALLOWED`).
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let defaults = IntakeConfig::default();
        let defaults_json = serde_json::to_value(&defaults)
            .map_err(|e| ConfigError::Load(format!("failed to serialize defaults: {e}")))?;

        let mut builder = config::Config::builder().add_source(config::Config::try_from(
            &defaults_json,
        )
        .map_err(|e| ConfigError::Load(format!("failed to seed defaults: {e}")))?);

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path).required(false),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix("VIGIL")
                .separator("__")
                .try_parsing(true),
        );

        let raw = builder
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        let config: IntakeConfig = raw
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        config
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_valid() {
        let config = IntakeConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_with_missing_file_falls_back_to_defaults() {
        let config = IntakeConfig::load(Some(std::path::Path::new(
            "/nonexistent/vigil-intake.toml",
        )))
        .unwrap();
        assert_eq!(config.ring_capacity_per_worker, default_ring_capacity_per_worker());
    }

    #[test]
    fn load_applies_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil-intake.toml");
        std::fs::write(
            &path,
            r#"
            fail_open_mode = false
            ring_capacity_per_worker = 512
            "#,
        )
        .unwrap();

        let config = IntakeConfig::load(Some(&path)).unwrap();
        assert!(!config.fail_open_mode);
        assert_eq!(config.ring_capacity_per_worker, 512);
    }

    #[test]
    fn rejects_zero_ring_capacity() {
        let mut config = IntakeConfig::default();
        config.ring_capacity_per_worker = 0;
        assert!(config.validate().is_err());
    }
}
