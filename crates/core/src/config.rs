//! TOML-based configuration system for Olimpiada.
//!
//! User passwords are stored as `_env` fields that reference environment
//! variable names. The actual secrets are resolved at runtime via
//! [`AppConfig::resolve_env_vars`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::gate::actions;
use crate::models::BASELINE_PHASES;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server process settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Reference timezone for day-granularity dates.
    #[serde(default)]
    pub calendar: CalendarConfig,

    /// HTTP API and session settings.
    #[serde(default)]
    pub web: WebConfig,

    /// Lifecycle policy knobs.
    #[serde(default)]
    pub policy: PolicyConfig,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory holding `olimpiada.db`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Seconds between active-phase checks (default 60).
    #[serde(default = "default_watch_interval")]
    pub watch_interval_secs: u64,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/olimpiada")
}
fn default_watch_interval() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
            watch_interval_secs: default_watch_interval(),
        }
    }
}

impl ServerConfig {
    /// Path of the SQLite database inside `data_dir`.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("olimpiada.db")
    }
}

// ---------------------------------------------------------------------------
// Calendar
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Minutes east of UTC. Bolivia (UTC-4) by default.
    #[serde(default = "default_utc_offset")]
    pub utc_offset_minutes: i32,
}

fn default_utc_offset() -> i32 {
    -240
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: default_utc_offset(),
        }
    }
}

// ---------------------------------------------------------------------------
// Web
// ---------------------------------------------------------------------------

/// A user allowed to log in, with the roles their session carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub username: String,

    /// Environment variable holding the password.
    pub password_env: String,

    /// Role names as they appear in the role catalog.
    #[serde(default)]
    pub roles: Vec<String>,

    /// Resolved password.
    #[serde(skip)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Listen address (default `127.0.0.1:3000`).
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Lifetime of a login session in hours (default 12).
    #[serde(default = "default_session_ttl")]
    pub session_ttl_hours: u64,

    /// Users that may log in. When empty, login is disabled and every
    /// request carries `anonymous_roles`.
    #[serde(default)]
    pub users: Vec<UserConfig>,

    /// Roles of unauthenticated requests when no users are configured.
    #[serde(default)]
    pub anonymous_roles: Vec<String>,
}

fn default_listen() -> String {
    "127.0.0.1:3000".into()
}
fn default_session_ttl() -> u64 {
    12
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            session_ttl_hours: default_session_ttl(),
            users: Vec::new(),
            anonymous_roles: Vec::new(),
        }
    }
}

impl WebConfig {
    /// `true` when requests must present a session token.
    pub fn auth_enabled(&self) -> bool {
        !self.users.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Accept new dates for a phase whose window has already ended.
    #[serde(default = "default_true")]
    pub allow_reschedule_finalized: bool,

    /// Phase codes that must all be scheduled before the app is `READY`.
    /// Also the phases a new cycle is seeded with, in this order.
    #[serde(default = "default_baseline_phases")]
    pub baseline_phases: Vec<String>,

    /// Action codes enabled in every phase of a freshly initialized cycle.
    /// All other phase cells start `false`.
    #[serde(default = "default_initial_phase_grants")]
    pub initial_phase_grants: Vec<String>,
}

fn default_true() -> bool {
    true
}
fn default_baseline_phases() -> Vec<String> {
    BASELINE_PHASES.iter().map(|(code, _)| code.to_string()).collect()
}
fn default_initial_phase_grants() -> Vec<String> {
    vec![
        actions::MANAGE_CYCLE.into(),
        actions::MANAGE_SCHEDULE.into(),
        actions::MANAGE_PERMISSIONS.into(),
    ]
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allow_reschedule_finalized: true,
            baseline_phases: default_baseline_phases(),
            initial_phase_grants: default_initial_phase_grants(),
        }
    }
}

impl PolicyConfig {
    /// `(code, display name)` of every baseline phase. Codes outside the
    /// built-in set use the code as their name.
    pub fn baseline_phase_names(&self) -> Vec<(String, String)> {
        self.baseline_phases
            .iter()
            .map(|code| {
                let name = BASELINE_PHASES
                    .iter()
                    .find(|(c, _)| c == code)
                    .map(|(_, n)| n.to_string())
                    .unwrap_or_else(|| code.clone());
                (code.clone(), name)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve every user's `password_env`.
    ///
    /// A missing variable logs a warning and leaves that user unable to log
    /// in; it does not fail the load.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");

        for user in &mut self.web.users {
            let field = format!("web.users[{}].password_env", user.username);
            user.password = resolve_optional_env(&user.password_env, &field);
        }

        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.watch_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.watch_interval_secs".into(),
                detail: "watch interval must be > 0".into(),
            });
        }
        if self.calendar.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(ConfigError::InvalidValue {
                field: "calendar.utc_offset_minutes".into(),
                detail: "offset must be within ±24h".into(),
            });
        }
        if self.web.session_ttl_hours == 0 {
            return Err(ConfigError::InvalidValue {
                field: "web.session_ttl_hours".into(),
                detail: "session TTL must be > 0".into(),
            });
        }
        if self.policy.baseline_phases.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "policy.baseline_phases".into(),
                detail: "at least one baseline phase is required".into(),
            });
        }

        let mut codes = HashSet::new();
        for code in &self.policy.baseline_phases {
            if code.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "policy.baseline_phases".into(),
                    detail: "phase codes must not be empty".into(),
                });
            }
            if !codes.insert(code) {
                return Err(ConfigError::InvalidValue {
                    field: "policy.baseline_phases".into(),
                    detail: format!("duplicate phase code '{}'", code),
                });
            }
        }

        let mut usernames = HashSet::new();
        for user in &self.web.users {
            if user.username.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "web.users".into(),
                    detail: "username must not be empty".into(),
                });
            }
            if !usernames.insert(&user.username) {
                return Err(ConfigError::InvalidValue {
                    field: "web.users".into(),
                    detail: format!("duplicate username '{}'", user.username),
                });
            }
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// A commented default config file, written by `olimpiada init`.
    pub fn default_toml() -> &'static str {
        DEFAULT_CONFIG_TOML
    }
}

const DEFAULT_CONFIG_TOML: &str = r#"# Olimpiada configuration

[server]
log_level = "info"
data_dir = "/var/lib/olimpiada"
watch_interval_secs = 60

[calendar]
# Minutes east of UTC used to decide what "today" is.
utc_offset_minutes = -240

[web]
listen = "127.0.0.1:3000"
session_ttl_hours = 12

[[web.users]]
username = "admin"
password_env = "OLIMPIADA_ADMIN_PASSWORD"
roles = ["Admin"]

[policy]
allow_reschedule_finalized = true
baseline_phases = ["CONFIGURACION", "EVALUACION", "FINAL"]
initial_phase_grants = ["MANAGE_CYCLE", "MANAGE_SCHEDULE", "MANAGE_PERMISSIONS"]
"#;

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[server]
log_level = "debug"
data_dir = "/tmp/olimpiada"
watch_interval_secs = 30

[calendar]
utc_offset_minutes = -300

[web]
listen = "0.0.0.0:8080"
session_ttl_hours = 4
anonymous_roles = ["Evaluador"]

[[web.users]]
username = "admin"
password_env = "OLIMPIADA_TEST_ADMIN_PW"
roles = ["Admin"]

[[web.users]]
username = "eva"
password_env = "OLIMPIADA_TEST_EVA_PW"
roles = ["Evaluador", "Responsable"]

[policy]
allow_reschedule_finalized = false
baseline_phases = ["CONFIGURACION", "EVALUACION", "FINAL", "PREMIACION"]
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.server.watch_interval_secs, 30);
        assert_eq!(config.calendar.utc_offset_minutes, -300);
        assert_eq!(config.web.users.len(), 2);
        assert_eq!(config.web.users[1].roles, vec!["Evaluador", "Responsable"]);
        assert!(!config.policy.allow_reschedule_finalized);
        assert_eq!(config.policy.baseline_phases.len(), 4);
        assert!(config.web.auth_enabled());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = AppConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(
            config.server.database_path(),
            PathBuf::from("/tmp/olimpiada/olimpiada.db")
        );
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/config.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.server.watch_interval_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "server.watch_interval_secs"
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_baseline_code() {
        let mut config = AppConfig::default();
        config.policy.baseline_phases = vec!["FINAL".into(), "FINAL".into()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "policy.baseline_phases"
        ));
    }

    #[test]
    fn test_validate_rejects_out_of_range_offset() {
        let mut config = AppConfig::default();
        config.calendar.utc_offset_minutes = 24 * 60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_env_vars() {
        std::env::set_var("OLIMPIADA_TEST_ADMIN_PW", "s3cret");
        std::env::remove_var("OLIMPIADA_TEST_EVA_PW");

        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.resolve_env_vars().unwrap();

        assert_eq!(config.web.users[0].password.as_deref(), Some("s3cret"));
        assert_eq!(config.web.users[1].password, None);

        std::env::remove_var("OLIMPIADA_TEST_ADMIN_PW");
    }

    #[test]
    fn test_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.watch_interval_secs, 60);
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.calendar.utc_offset_minutes, -240);
        assert_eq!(config.web.listen, "127.0.0.1:3000");
        assert!(!config.web.auth_enabled());
        assert!(config.policy.allow_reschedule_finalized);
        assert_eq!(
            config.policy.baseline_phases,
            vec!["CONFIGURACION", "EVALUACION", "FINAL"]
        );
        assert!(config
            .policy
            .initial_phase_grants
            .contains(&actions::MANAGE_SCHEDULE.to_string()));
        config.validate().unwrap();
    }

    #[test]
    fn test_default_toml_parses_and_validates() {
        let config: AppConfig = toml::from_str(AppConfig::default_toml()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.web.users[0].username, "admin");
    }

    #[test]
    fn test_baseline_phase_names() {
        let mut policy = PolicyConfig::default();
        policy.baseline_phases.push("PREMIACION".into());
        let names = policy.baseline_phase_names();
        assert_eq!(names[1], ("EVALUACION".to_string(), "Evaluación".to_string()));
        assert_eq!(names[3], ("PREMIACION".to_string(), "PREMIACION".to_string()));
    }
}
