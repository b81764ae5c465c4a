use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "TaskManager";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default `tracing` filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "info,taskmanager_lib=debug,tower_http=info"
}

/// Errors raised while assembling startup configuration.
/// All of them are fatal: the process must not start serving.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("JWT_SECRET is not configured")]
    MissingSigningSecret,
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

// ═══════════════════════════════════════════════════════════
// Deployment posture
// ═══════════════════════════════════════════════════════════

/// Deployment posture. Controls how much error detail reaches clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl Environment {
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    fn parse(value: &str) -> Result<Self, ConfigurationError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" | "staging" => Ok(Self::Production),
            _ => Err(ConfigurationError::Invalid {
                key: "APP_ENVIRONMENT",
                value: value.to_string(),
            }),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Sections
// ═══════════════════════════════════════════════════════════

/// Audit pipeline settings. Fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditSettings {
    pub enabled: bool,
    pub excluded_paths: Vec<String>,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            excluded_paths: vec!["/swagger".to_string(), "/health".to_string()],
        }
    }
}

/// Brute-force throttle policy for the login endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Failures before an identity becomes locked.
    pub max_attempts: u32,
    /// Window length for the first locked failure; grows linearly after that.
    pub backoff_base: Duration,
    /// Upper bound on any single window.
    pub max_backoff: Duration,
    /// Artificial delay before answering a locked-out attempt.
    pub lockout_delay: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: Duration::from_secs(2),
            max_backoff: Duration::from_secs(15 * 60),
            lockout_delay: Duration::from_secs(2),
        }
    }
}

/// Full runtime configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub jwt_secret: Option<String>,
    /// `None` keeps everything in an in-memory database.
    pub database_path: Option<PathBuf>,
    pub audit: AuditSettings,
    pub lockout: LockoutPolicy,
    pub rate_limit_per_minute: u32,
    pub password_hash_iterations: u32,
    /// Audit rows older than this are pruned by the maintenance task.
    pub audit_retention_days: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            environment: Environment::default(),
            jwt_secret: None,
            database_path: None,
            audit: AuditSettings::default(),
            lockout: LockoutPolicy::default(),
            rate_limit_per_minute: 100,
            password_hash_iterations: crate::users::DEFAULT_PBKDF2_ITERATIONS,
            audit_retention_days: 90,
        }
    }
}

impl Settings {
    /// Read settings from process environment variables.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary key lookup. Unset keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(v) = lookup("BIND_ADDR") {
            settings.bind_addr = v.parse().map_err(|_| invalid("BIND_ADDR", &v))?;
        }
        if let Some(v) = lookup("APP_ENVIRONMENT") {
            settings.environment = Environment::parse(&v)?;
        }
        settings.jwt_secret = lookup("JWT_SECRET").filter(|s| !s.is_empty());
        settings.database_path = lookup("DATABASE_PATH")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        if let Some(v) = lookup("AUDIT_LOGGING_ENABLED") {
            settings.audit.enabled = parse_bool("AUDIT_LOGGING_ENABLED", &v)?;
        }
        if let Some(v) = lookup("AUDIT_EXCLUDED_PATHS") {
            settings.audit.excluded_paths = v
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(v) = lookup("LOGIN_MAX_ATTEMPTS") {
            let n: u32 = v.parse().map_err(|_| invalid("LOGIN_MAX_ATTEMPTS", &v))?;
            if n == 0 {
                return Err(invalid("LOGIN_MAX_ATTEMPTS", &v));
            }
            settings.lockout.max_attempts = n;
        }
        if let Some(v) = lookup("LOGIN_BACKOFF_BASE_SECS") {
            settings.lockout.backoff_base = parse_nonzero_secs("LOGIN_BACKOFF_BASE_SECS", &v)?;
        }
        if let Some(v) = lookup("LOGIN_BACKOFF_CAP_SECS") {
            settings.lockout.max_backoff = parse_nonzero_secs("LOGIN_BACKOFF_CAP_SECS", &v)?;
        }
        // Zero or inverted windows would never block.
        if settings.lockout.max_backoff < settings.lockout.backoff_base {
            return Err(invalid(
                "LOGIN_BACKOFF_CAP_SECS",
                &settings.lockout.max_backoff.as_secs().to_string(),
            ));
        }
        if let Some(v) = lookup("LOGIN_LOCKOUT_DELAY_MS") {
            let ms: u64 = v.parse().map_err(|_| invalid("LOGIN_LOCKOUT_DELAY_MS", &v))?;
            settings.lockout.lockout_delay = Duration::from_millis(ms);
        }
        if let Some(v) = lookup("RATE_LIMIT_PER_MINUTE") {
            settings.rate_limit_per_minute =
                v.parse().map_err(|_| invalid("RATE_LIMIT_PER_MINUTE", &v))?;
        }
        if let Some(v) = lookup("PASSWORD_HASH_ITERATIONS") {
            settings.password_hash_iterations = v
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| invalid("PASSWORD_HASH_ITERATIONS", &v))?;
        }
        if let Some(v) = lookup("AUDIT_RETENTION_DAYS") {
            settings.audit_retention_days = v
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| invalid("AUDIT_RETENTION_DAYS", &v))?;
        }

        Ok(settings)
    }

    /// The signing secret, or the fatal startup error if it is missing.
    pub fn require_jwt_secret(&self) -> Result<&str, ConfigurationError> {
        self.jwt_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigurationError::MissingSigningSecret)
    }
}

fn invalid(key: &'static str, value: &str) -> ConfigurationError {
    ConfigurationError::Invalid {
        key,
        value: value.to_string(),
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigurationError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

fn parse_nonzero_secs(key: &'static str, value: &str) -> Result<Duration, ConfigurationError> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .ok_or_else(|| invalid(key, value))
}
