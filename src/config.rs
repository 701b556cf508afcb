/**
 * ============================================================================
 * AGENT CONFIGURATION MODULE
 * ============================================================================
 *
 * PURPOSE: Configuration schema, persistence, and validation
 *
 * STORAGE: Configuration stored as JSON
 * FILE PATH: {config_dir}/spiego/agent_config.json (overridable via --config)
 *
 * FUNCTIONALITY:
 * - Define configuration schema with production defaults
 * - Validate configuration values
 * - Load configuration from disk (creating a default file when missing)
 * - Save configuration atomically
 *
 * ============================================================================
 */

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Placeholder written into freshly generated config files.
pub const PLACEHOLDER_AUTH_KEY: &str = "your-secret-auth-key-change-me";

/**
 * Complete agent configuration
 * Every watcher, the batch sender and the block-list reconciler read from here
 */
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    // Collector host name or address
    pub server_host: String,

    // Collector port
    pub server_port: u16,

    // Use https:// instead of http://
    pub use_ssl: bool,

    // Bearer key shared with the collector
    pub auth_key: String,

    // Append-only NDJSON file used when delivery is exhausted
    pub fallback_file: PathBuf,

    // Seconds between batch sends
    pub send_interval_seconds: u64,

    // Total delivery tries per batch
    pub retry_attempts: u32,

    // Delay between delivery tries in milliseconds
    pub retry_delay_ms: u64,

    // HTTP timeout for event delivery in seconds
    pub request_timeout_seconds: u64,

    // Seconds without pointer movement before mouse_idle
    pub idle_threshold_seconds: u64,

    // Foreground and pointer polling cadence in milliseconds
    pub poll_interval_ms: u64,

    // Seconds without any input before afk_start
    pub afk_threshold_seconds: u64,

    // Seconds without key presses that close a key segment
    pub key_idle_timeout_seconds: u64,

    // Key segment polling cadence in milliseconds
    pub key_poll_interval_ms: u64,

    // Run the hosts-file reconciler
    pub blocklist_enabled: bool,

    // Seconds between block-list polls
    pub blocked_poll_interval_seconds: u64,

    // HTTP timeout for block-list polls in seconds
    pub blocked_http_timeout_seconds: u64,

    // Total hosts-file write tries per cycle
    pub blocked_write_retries: u32,

    // Delay between hosts-file write tries in milliseconds
    pub blocked_write_retry_delay_ms: u64,

    // Address blocked domains resolve to
    pub block_address: String,

    // Hosts file override; platform default when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hosts_path: Option<PathBuf>,

    // Resend the fallback file once at startup
    pub replay_fallback_on_start: bool,

    // Upper bound on waiting for each task at shutdown in milliseconds
    pub shutdown_timeout_ms: u64,
}

impl Default for AgentConfig {
    /**
     * Defaults mirror the values the agent has always shipped with
     * auth_key is intentionally empty and must be set by the operator
     */
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 5000,
            use_ssl: false,
            auth_key: String::new(),
            fallback_file: PathBuf::from("activity_log_fallback.jsonl"),
            send_interval_seconds: 5,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            request_timeout_seconds: 10,
            idle_threshold_seconds: 60,
            poll_interval_ms: 1000,
            afk_threshold_seconds: 20,
            key_idle_timeout_seconds: 10,
            key_poll_interval_ms: 500,
            blocklist_enabled: true,
            blocked_poll_interval_seconds: 5,
            blocked_http_timeout_seconds: 5,
            blocked_write_retries: 3,
            blocked_write_retry_delay_ms: 500,
            block_address: "127.0.0.1".to_string(),
            hosts_path: None,
            replay_fallback_on_start: true,
            shutdown_timeout_ms: 2000,
        }
    }
}

impl AgentConfig {
    /**
     * Base URL of the collector, e.g. http://127.0.0.1:5000
     */
    pub fn server_base_url(&self) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.server_host, self.server_port)
    }

    /**
     * Hosts file the reconciler edits
     */
    pub fn resolved_hosts_path(&self) -> PathBuf {
        self.hosts_path.clone().unwrap_or_else(default_hosts_path)
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_secs(self.send_interval_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn key_poll_interval(&self) -> Duration {
        Duration::from_millis(self.key_poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /**
     * Validate configuration values
     * Returns Ok(()) if valid, Err(String) with validation message if invalid
     */
    pub fn validate(&self) -> Result<(), String> {
        if self.auth_key.trim().is_empty() {
            return Err("auth_key is required".to_string());
        }
        if self.auth_key == PLACEHOLDER_AUTH_KEY {
            return Err(
                "auth_key still has the placeholder value, set the key issued by the collector"
                    .to_string(),
            );
        }
        if self.server_host.trim().is_empty() {
            return Err("server_host must not be empty".to_string());
        }
        if self.server_port == 0 {
            return Err("server_port must be non-zero".to_string());
        }

        // Validate numeric ranges
        if self.send_interval_seconds == 0 {
            return Err("send_interval_seconds must be at least 1".to_string());
        }
        if self.retry_attempts == 0 || self.retry_attempts > 20 {
            return Err("retry_attempts must be between 1 and 20".to_string());
        }
        if self.request_timeout_seconds == 0 || self.blocked_http_timeout_seconds == 0 {
            return Err("HTTP timeouts must be at least 1 second".to_string());
        }
        if self.poll_interval_ms == 0 || self.key_poll_interval_ms == 0 {
            return Err("poll intervals must be non-zero".to_string());
        }
        if self.idle_threshold_seconds == 0 || self.afk_threshold_seconds == 0 {
            return Err("idle and AFK thresholds must be at least 1 second".to_string());
        }
        if self.key_idle_timeout_seconds == 0 {
            return Err("key_idle_timeout_seconds must be at least 1".to_string());
        }
        if self.blocked_poll_interval_seconds == 0 {
            return Err("blocked_poll_interval_seconds must be at least 1".to_string());
        }
        if self.blocked_write_retries == 0 {
            return Err("blocked_write_retries must be at least 1".to_string());
        }
        if self.fallback_file.as_os_str().is_empty() {
            return Err("fallback_file must not be empty".to_string());
        }

        self.block_address.parse::<IpAddr>().map_err(|e| {
            format!(
                "block_address '{}' is not an IP address: {}",
                self.block_address, e
            )
        })?;

        Ok(())
    }
}

/**
 * Platform hosts file location
 */
pub fn default_hosts_path() -> PathBuf {
    if cfg!(target_os = "windows") {
        let root = std::env::var_os("SystemRoot").unwrap_or_else(|| "C:\\Windows".into());
        PathBuf::from(root)
            .join("System32")
            .join("drivers")
            .join("etc")
            .join("hosts")
    } else {
        PathBuf::from("/etc/hosts")
    }
}

/**
 * Get default path to configuration file
 * Returns {config_dir}/spiego/agent_config.json
 */
pub fn default_config_path() -> Result<PathBuf, String> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| "Failed to resolve config directory".to_string())?;

    Ok(config_dir.join("spiego").join("agent_config.json"))
}

/**
 * Load configuration from disk
 * A missing file is written out with defaults first, so the operator has
 * something to edit; validation then fails until auth_key is set
 */
pub fn load_config(config_path: &Path) -> Result<AgentConfig, String> {
    if !config_path.exists() {
        let mut template = AgentConfig::default();
        template.auth_key = PLACEHOLDER_AUTH_KEY.to_string();
        save_config(config_path, &template)?;
        log::warn!("Config not found, wrote defaults to {}", config_path.display());
    }

    let json_str = fs::read_to_string(config_path)
        .map_err(|e| format!("Failed to read config file: {}", e))?;

    let config: AgentConfig = serde_json::from_str(&json_str)
        .map_err(|e| format!("Failed to parse config JSON: {}", e))?;

    config
        .validate()
        .map_err(|e| format!("Invalid config {}: {}", config_path.display(), e))?;

    log::info!("Loaded agent config from {}", config_path.display());
    Ok(config)
}

/**
 * Save configuration to disk atomically
 * Uses temporary file + rename to prevent corruption
 */
pub fn save_config(config_path: &Path, config: &AgentConfig) -> Result<(), String> {
    if let Some(parent) = config_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }
    }

    let json_str = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;

    let temp_path = config_path.with_extension("json.tmp");
    fs::write(&temp_path, json_str)
        .map_err(|e| format!("Failed to write temporary config file: {}", e))?;

    fs::rename(&temp_path, config_path)
        .map_err(|e| format!("Failed to save config file: {}", e))?;

    log::info!("Saved agent config to {}", config_path.display());
    Ok(())
}
