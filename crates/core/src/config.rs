//! Layered configuration: compiled defaults → optional TOML file →
//! environment variables (highest precedence), matching the exact option
//! names the spec's external-interface table recognizes.
//!
//! The sectioned-struct/serde-default shape follows this codebase
//! family's established `Config` pattern; the environment-variable layer
//! on top exists because the spec's own option names (`BIND_HOST`,
//! `PORT_LO`, …) are env-var shaped rather than TOML-section shaped, and
//! operators expect to set them directly.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}
fn default_bind_port() -> u16 {
    8080
}
fn default_port_lo() -> u16 {
    20000
}
fn default_port_hi() -> u16 {
    20999
}
fn default_max_sessions_per_user() -> u32 {
    4
}
fn default_session_timeout_hours() -> u64 {
    24
}
fn default_ready_timeout_secs() -> u64 {
    15
}
fn default_container_image() -> String {
    "portal-terminal:latest".to_string()
}
fn default_container_memory_mb() -> u64 {
    512
}
fn default_container_cpu_quota() -> f64 {
    1.0
}
fn default_workspace_root() -> String {
    "/var/lib/portal/workspaces".to_string()
}
fn default_directory_service_timeout_secs() -> u64 {
    5
}
fn default_log_format() -> String {
    "human".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,
    /// Whether this process sits behind a TLS-terminating reverse proxy
    /// (§1 treats TLS termination as an external collaborator). Governs
    /// only the session cookie's `Secure` attribute (§6).
    #[serde(default)]
    pub behind_tls_proxy: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            bind_port: default_bind_port(),
            behind_tls_proxy: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "default_port_lo")]
    pub port_lo: u16,
    #[serde(default = "default_port_hi")]
    pub port_hi: u16,
    #[serde(default = "default_max_sessions_per_user")]
    pub max_sessions_per_user: u32,
    #[serde(default = "default_session_timeout_hours")]
    pub session_timeout_hours: u64,
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            port_lo: default_port_lo(),
            port_hi: default_port_hi(),
            max_sessions_per_user: default_max_sessions_per_user(),
            session_timeout_hours: default_session_timeout_hours(),
            ready_timeout_secs: default_ready_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainersConfig {
    #[serde(default = "default_container_image")]
    pub image: String,
    #[serde(default = "default_container_memory_mb")]
    pub memory_mb: u64,
    #[serde(default = "default_container_cpu_quota")]
    pub cpu_quota: f64,
    #[serde(default = "default_workspace_root")]
    pub workspace_root: String,
}

impl Default for ContainersConfig {
    fn default() -> Self {
        Self {
            image: default_container_image(),
            memory_mb: default_container_memory_mb(),
            cpu_quota: default_container_cpu_quota(),
            workspace_root: default_workspace_root(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Path to the local user file. `None` disables auth (loopback-only mode).
    #[serde(default)]
    pub auth_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryServiceConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub bind_dn: Option<String>,
    #[serde(default)]
    pub bind_password: Option<String>,
    #[serde(default)]
    pub user_base: Option<String>,
    /// Must contain exactly one `{username}` substitution (validated at startup).
    #[serde(default)]
    pub user_filter: Option<String>,
    #[serde(default)]
    pub group_base: Option<String>,
    /// Must contain exactly one `{user_dn}` substitution, if set (validated at startup).
    #[serde(default)]
    pub group_filter: Option<String>,
    #[serde(default = "default_directory_service_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DirectoryServiceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            bind_dn: None,
            bind_password: None,
            user_base: None,
            user_filter: None,
            group_base: None,
            group_filter: None,
            timeout_secs: default_directory_service_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub containers: ContainersConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub directory_service: DirectoryServiceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        Path::new(&home).join(".config/portal/config.toml")
    }

    /// Load from the default path (if present), then apply environment
    /// overrides. Falls back to compiled defaults if no file exists.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply the spec's documented environment variable names, highest
    /// precedence over whatever the TOML file or compiled defaults said.
    pub fn apply_env_overrides(&mut self) {
        use std::env::var;

        if let Ok(v) = var("BIND_HOST") {
            self.server.bind_host = v;
        }
        if let Some(v) = var("BIND_PORT").ok().and_then(|s| s.parse().ok()) {
            self.server.bind_port = v;
        }
        if let Some(v) = var("BEHIND_TLS_PROXY").ok().and_then(|s| s.parse().ok()) {
            self.server.behind_tls_proxy = v;
        }
        if let Some(v) = var("PORT_LO").ok().and_then(|s| s.parse().ok()) {
            self.sessions.port_lo = v;
        }
        if let Some(v) = var("PORT_HI").ok().and_then(|s| s.parse().ok()) {
            self.sessions.port_hi = v;
        }
        if let Some(v) = var("MAX_SESSIONS_PER_USER").ok().and_then(|s| s.parse().ok()) {
            self.sessions.max_sessions_per_user = v;
        }
        if let Some(v) = var("SESSION_TIMEOUT_HOURS").ok().and_then(|s| s.parse().ok()) {
            self.sessions.session_timeout_hours = v;
        }
        if let Some(v) = var("READY_TIMEOUT").ok().and_then(|s| s.parse().ok()) {
            self.sessions.ready_timeout_secs = v;
        }
        if let Ok(v) = var("CONTAINER_IMAGE") {
            self.containers.image = v;
        }
        if let Some(v) = var("CONTAINER_MEMORY").ok().and_then(|s| s.parse().ok()) {
            self.containers.memory_mb = v;
        }
        if let Some(v) = var("CONTAINER_CPU_QUOTA").ok().and_then(|s| s.parse().ok()) {
            self.containers.cpu_quota = v;
        }
        if let Ok(v) = var("WORKSPACE_ROOT") {
            self.containers.workspace_root = v;
        }
        if let Ok(v) = var("AUTH_FILE") {
            self.auth.auth_file = Some(v);
        }
        if let Some(v) = var("DIRECTORY_SERVICE_ENABLED").ok().and_then(|s| s.parse().ok()) {
            self.directory_service.enabled = v;
        }
        if let Ok(v) = var("DIRECTORY_SERVICE_URL") {
            self.directory_service.url = Some(v);
        }
        if let Ok(v) = var("DIRECTORY_SERVICE_BIND_DN") {
            self.directory_service.bind_dn = Some(v);
        }
        if let Ok(v) = var("DIRECTORY_SERVICE_BIND_PASSWORD") {
            self.directory_service.bind_password = Some(v);
        }
        if let Ok(v) = var("DIRECTORY_SERVICE_USER_BASE") {
            self.directory_service.user_base = Some(v);
        }
        if let Ok(v) = var("DIRECTORY_SERVICE_USER_FILTER") {
            self.directory_service.user_filter = Some(v);
        }
        if let Ok(v) = var("DIRECTORY_SERVICE_GROUP_BASE") {
            self.directory_service.group_base = Some(v);
        }
        if let Ok(v) = var("DIRECTORY_SERVICE_GROUP_FILTER") {
            self.directory_service.group_filter = Some(v);
        }
        if let Some(v) = var("DIRECTORY_SERVICE_TIMEOUT_SECS").ok().and_then(|s| s.parse().ok()) {
            self.directory_service.timeout_secs = v;
        }
        if let Ok(v) = var("LOG_FORMAT") {
            self.logging.format = v;
        }
    }

    /// Validate invariants that must hold before the listener binds.
    /// Rejects malformed directory-service filters rather than silently
    /// bypassing the group-membership check (§9 open question).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sessions.port_lo > self.sessions.port_hi {
            return Err(ConfigError::Invalid(format!(
                "PORT_LO ({}) must be <= PORT_HI ({})",
                self.sessions.port_lo, self.sessions.port_hi
            )));
        }

        if self.directory_service.enabled {
            let user_filter = self.directory_service.user_filter.as_deref().ok_or_else(|| {
                ConfigError::Invalid("DIRECTORY_SERVICE_USER_FILTER is required when directory service is enabled".into())
            })?;
            validate_single_substitution(user_filter, "{username}")?;

            if let Some(group_filter) = self.directory_service.group_filter.as_deref() {
                validate_single_substitution(group_filter, "{user_dn}")?;
            }

            if self.directory_service.url.is_none() {
                return Err(ConfigError::Invalid(
                    "DIRECTORY_SERVICE_URL is required when directory service is enabled".into(),
                ));
            }
        }

        Ok(())
    }
}

fn validate_single_substitution(filter: &str, placeholder: &str) -> Result<(), ConfigError> {
    let count = filter.matches(placeholder).count();
    if count != 1 {
        return Err(ConfigError::Invalid(format!(
            "filter `{filter}` must contain exactly one `{placeholder}` substitution, found {count}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert!(config.sessions.port_lo < config.sessions.port_hi);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn toml_roundtrip() {
        let config = Config::default();
        let toml_str = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.server.bind_port, config.server.bind_port);
    }

    #[test]
    fn load_from_missing_file_sections_default() {
        let toml_str = "[server]\nbind_port = 9090\n";
        let parsed: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(parsed.server.bind_port, 9090);
        assert_eq!(parsed.sessions.max_sessions_per_user, default_max_sessions_per_user());
    }

    #[test]
    fn rejects_inverted_port_range() {
        let mut config = Config::default();
        config.sessions.port_lo = 200;
        config.sessions.port_hi = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_directory_service_filter_without_placeholder() {
        let mut config = Config::default();
        config.directory_service.enabled = true;
        config.directory_service.url = Some("ldap://dc.example.com".into());
        config.directory_service.user_filter = Some("(uid=admin)".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_directory_service_filter_with_duplicate_placeholder() {
        let mut config = Config::default();
        config.directory_service.enabled = true;
        config.directory_service.url = Some("ldap://dc.example.com".into());
        config.directory_service.user_filter = Some("(|(uid={username})(mail={username}))".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn accepts_well_formed_directory_service_filters() {
        let mut config = Config::default();
        config.directory_service.enabled = true;
        config.directory_service.url = Some("ldap://dc.example.com".into());
        config.directory_service.user_filter = Some("(uid={username})".into());
        config.directory_service.group_filter = Some("(member={user_dn})".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_take_precedence() {
        std::env::set_var("BIND_PORT", "4242");
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.server.bind_port, 4242);
        std::env::remove_var("BIND_PORT");
    }
}
