//! Server configuration from `SHIPSEC_*` environment variables.
//!
//! Every knob has a default suitable for a local single-node
//! deployment; production overrides them through the environment. The
//! server exits non-zero when a fatal value (unreachable database,
//! unparsable port) stops startup.

use std::time::Duration;

/// Resolved server configuration.
#[derive(Debug, Clone)]
pub struct ShipsecConfig {
    /// Bind host (`SHIPSEC_HOST`).
    pub host: String,
    /// Bind port (`SHIPSEC_PORT`).
    pub port: u16,
    /// SQLite database URL (`SHIPSEC_DATABASE_URL`).
    pub database_url: String,
    /// Tenant id runs execute under (`SHIPSEC_TENANT_ID`).
    pub tenant_id: String,
    /// Public base URL used in webhook registration responses
    /// (`SHIPSEC_BASE_URL`).
    pub base_url: String,
    /// Endpoint polled for version announcements
    /// (`SHIPSEC_VERSION_CHECK_URL`); empty disables the check.
    pub version_check_url: String,
    /// Whether the container runner connects to Docker at startup
    /// (`SHIPSEC_CONTAINER_RUNNER`).
    pub container_runner_enabled: bool,
    /// Whether the cron scheduler task starts
    /// (`SHIPSEC_SCHEDULER`).
    pub scheduler_enabled: bool,
    /// Grace period for run cancellation
    /// (`SHIPSEC_CANCEL_GRACE_SECONDS`).
    pub cancel_grace: Duration,
    /// Scheduler tick interval (`SHIPSEC_SCHEDULER_INTERVAL_SECONDS`).
    pub scheduler_interval: Duration,
}

impl ShipsecConfig {
    /// Read configuration from the environment, falling back to
    /// defaults.
    pub fn from_env() -> Result<Self, String> {
        let port = env_or("SHIPSEC_PORT", "8080")
            .parse::<u16>()
            .map_err(|_| "SHIPSEC_PORT must be a valid port number".to_string())?;
        let cancel_grace = env_or("SHIPSEC_CANCEL_GRACE_SECONDS", "30")
            .parse::<u64>()
            .map_err(|_| "SHIPSEC_CANCEL_GRACE_SECONDS must be a number".to_string())?;
        let scheduler_interval = env_or("SHIPSEC_SCHEDULER_INTERVAL_SECONDS", "30")
            .parse::<u64>()
            .map_err(|_| "SHIPSEC_SCHEDULER_INTERVAL_SECONDS must be a number".to_string())?;

        Ok(Self {
            host: env_or("SHIPSEC_HOST", "127.0.0.1"),
            port,
            database_url: env_or("SHIPSEC_DATABASE_URL", "sqlite://shipsec.db?mode=rwc"),
            tenant_id: env_or("SHIPSEC_TENANT_ID", "default"),
            base_url: env_or("SHIPSEC_BASE_URL", "http://127.0.0.1:8080"),
            version_check_url: env_or("SHIPSEC_VERSION_CHECK_URL", ""),
            container_runner_enabled: env_flag("SHIPSEC_CONTAINER_RUNNER", false),
            scheduler_enabled: env_flag("SHIPSEC_SCHEDULER", true),
            cancel_grace: Duration::from_secs(cancel_grace),
            scheduler_interval: Duration::from_secs(scheduler_interval),
        })
    }

    /// Socket address string for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(value.as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        // Scoped to variables the suite does not set.
        let config = ShipsecConfig::from_env().unwrap();
        assert!(!config.host.is_empty());
        assert_eq!(config.cancel_grace, Duration::from_secs(30));
        assert!(config.bind_addr().contains(':'));
    }
}
