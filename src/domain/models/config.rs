use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::mode::ConnectionMode;

/// Main configuration structure, supplied once at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Storage backend configuration
    #[serde(default)]
    pub backend: BackendConfig,

    /// Per-mode pool sizing and pool maintenance
    #[serde(default)]
    pub pool: PoolConfig,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Circuit breaker thresholds
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Query result cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Health, security and query tracking
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Per-attempt timeout for a storage round-trip, in milliseconds
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Circuit that guards the storage backend
    #[serde(default = "default_circuit_name")]
    pub circuit_name: String,
}

const fn default_query_timeout_ms() -> u64 {
    30_000
}

fn default_circuit_name() -> String {
    "primary".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            pool: PoolConfig::default(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            cache: CacheConfig::default(),
            monitor: MonitorConfig::default(),
            logging: LoggingConfig::default(),
            query_timeout_ms: default_query_timeout_ms(),
            circuit_name: default_circuit_name(),
        }
    }
}

impl Config {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BackendConfig {
    /// Backend URL, e.g. `sqlite:dbweave.db` or `sqlite::memory:`
    #[serde(default = "default_backend_url")]
    pub url: String,
}

fn default_backend_url() -> String {
    "sqlite:dbweave.db".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
        }
    }
}

/// Sizing for one connection mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ModePoolConfig {
    pub min_size: usize,
    pub max_size: usize,
    pub idle_timeout_secs: u64,
}

impl ModePoolConfig {
    pub const fn new(min_size: usize, max_size: usize, idle_timeout_secs: u64) -> Self {
        Self {
            min_size,
            max_size,
            idle_timeout_secs,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PoolConfig {
    #[serde(default = "default_transaction_pool")]
    pub transaction: ModePoolConfig,

    #[serde(default = "default_session_pool")]
    pub session: ModePoolConfig,

    #[serde(default = "default_direct_pool")]
    pub direct: ModePoolConfig,

    /// Default time `acquire` may wait for a free connection
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// Upper bound on one wait between pool re-checks
    #[serde(default = "default_wait_poll_interval_ms")]
    pub wait_poll_interval_ms: u64,

    /// Interval of the pool maintenance loop
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,

    /// Timeout for a single connection probe
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Probe failures in one maintenance cycle that raise a ConnectionFailure alert
    #[serde(default = "default_probe_failure_alert_threshold")]
    pub probe_failure_alert_threshold: usize,
}

const fn default_transaction_pool() -> ModePoolConfig {
    ModePoolConfig::new(2, 10, 300)
}

const fn default_session_pool() -> ModePoolConfig {
    ModePoolConfig::new(1, 5, 600)
}

const fn default_direct_pool() -> ModePoolConfig {
    ModePoolConfig::new(0, 2, 60)
}

const fn default_acquire_timeout_ms() -> u64 {
    5_000
}

const fn default_wait_poll_interval_ms() -> u64 {
    50
}

const fn default_maintenance_interval_secs() -> u64 {
    30
}

const fn default_probe_timeout_ms() -> u64 {
    2_000
}

const fn default_probe_failure_alert_threshold() -> usize {
    3
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            transaction: default_transaction_pool(),
            session: default_session_pool(),
            direct: default_direct_pool(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            wait_poll_interval_ms: default_wait_poll_interval_ms(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
            probe_failure_alert_threshold: default_probe_failure_alert_threshold(),
        }
    }
}

impl PoolConfig {
    pub fn for_mode(&self, mode: ConnectionMode) -> &ModePoolConfig {
        match mode {
            ConnectionMode::Direct => &self.direct,
            ConnectionMode::Session => &self.session,
            ConnectionMode::Transaction => &self.transaction,
        }
    }

    pub fn for_mode_mut(&mut self, mode: ConnectionMode) -> &mut ModePoolConfig {
        match mode {
            ConnectionMode::Direct => &mut self.direct,
            ConnectionMode::Session => &mut self.session,
            ConnectionMode::Transaction => &mut self.transaction,
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn wait_poll_interval(&self) -> Duration {
        Duration::from_millis(self.wait_poll_interval_ms.max(1))
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Total time budget across all attempts in milliseconds
    #[serde(default = "default_max_elapsed_ms")]
    pub max_elapsed_ms: u64,

    /// Backoff growth factor
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Jitter: each delay is drawn from `delay * (1 ± factor)`
    #[serde(default = "default_randomization_factor")]
    pub randomization_factor: f64,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    100
}

const fn default_max_backoff_ms() -> u64 {
    2_000
}

const fn default_max_elapsed_ms() -> u64 {
    10_000
}

const fn default_multiplier() -> f64 {
    2.0
}

const fn default_randomization_factor() -> f64 {
    0.5
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_elapsed_ms: default_max_elapsed_ms(),
            multiplier: default_multiplier(),
            randomization_factor: default_randomization_factor(),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Consecutive trial successes that close a half-open circuit
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// How long an open circuit rejects calls, in milliseconds
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Whether circuit breakers are active
    #[serde(default = "default_true")]
    pub enabled: bool,
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_success_threshold() -> u32 {
    2
}

const fn default_cooldown_ms() -> u64 {
    30_000
}

const fn default_true() -> bool {
    true
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            cooldown_ms: default_cooldown_ms(),
            enabled: true,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Query cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Default entry lifetime in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    /// Maximum number of cached results
    #[serde(default = "default_cache_capacity")]
    pub max_capacity: u64,
}

const fn default_cache_ttl_secs() -> u64 {
    300
}

const fn default_cache_capacity() -> u64 {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_cache_ttl_secs(),
            max_capacity: default_cache_capacity(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MonitorConfig {
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    #[serde(default = "default_security_check_interval_secs")]
    pub security_check_interval_secs: u64,

    /// Probe response time at which health becomes Warning
    #[serde(default = "default_warning_response_ms")]
    pub warning_response_ms: u64,

    /// Probe response time at which health becomes Critical
    #[serde(default = "default_critical_response_ms")]
    pub critical_response_ms: u64,

    /// Executions slower than this count as slow queries
    #[serde(default = "default_slow_query_ms")]
    pub slow_query_ms: u64,

    /// Slow queries within the window above which an alert fires
    #[serde(default = "default_slow_query_burst_threshold")]
    pub slow_query_burst_threshold: usize,

    /// Failure fraction within the window above which an alert fires
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,

    /// Minimum executions in the window before the error rate is judged
    #[serde(default = "default_min_error_sample")]
    pub min_error_sample: usize,

    /// Connection-class failures within the window that raise an alert
    #[serde(default = "default_connection_failure_threshold")]
    pub connection_failure_threshold: usize,

    /// How far back the security loop looks, in seconds
    #[serde(default = "default_security_window_secs")]
    pub security_window_secs: u64,

    /// Query starts per second above which RateLimitExceeded is reported
    #[serde(default = "default_max_queries_per_second")]
    pub max_queries_per_second: u32,

    /// Capacity of the execution history
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Capacity of the health result history
    #[serde(default = "default_health_history_capacity")]
    pub health_history_capacity: usize,

    /// Capacity of the alert history
    #[serde(default = "default_alert_history_capacity")]
    pub alert_history_capacity: usize,

    /// Longest a single alert subscriber may take per alert, in milliseconds
    #[serde(default = "default_alert_callback_timeout_ms")]
    pub alert_callback_timeout_ms: u64,

    /// Reconnection attempts made by auto-recovery
    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,

    /// Delay between reconnection attempts, in milliseconds
    #[serde(default = "default_recovery_delay_ms")]
    pub recovery_delay_ms: u64,

    /// Minimum gap between two periodic alerts of the same kind, in seconds
    #[serde(default = "default_alert_cooldown_secs")]
    pub alert_cooldown_secs: u64,

    #[serde(default = "default_true")]
    pub auto_recovery: bool,
}

const fn default_health_check_interval_secs() -> u64 {
    30
}

const fn default_security_check_interval_secs() -> u64 {
    60
}

const fn default_warning_response_ms() -> u64 {
    1_000
}

const fn default_critical_response_ms() -> u64 {
    5_000
}

const fn default_slow_query_ms() -> u64 {
    1_000
}

const fn default_slow_query_burst_threshold() -> usize {
    10
}

const fn default_error_rate_threshold() -> f64 {
    0.1
}

const fn default_min_error_sample() -> usize {
    10
}

const fn default_connection_failure_threshold() -> usize {
    3
}

const fn default_security_window_secs() -> u64 {
    300
}

const fn default_max_queries_per_second() -> u32 {
    200
}

const fn default_history_capacity() -> usize {
    1_000
}

const fn default_health_history_capacity() -> usize {
    100
}

const fn default_alert_history_capacity() -> usize {
    200
}

const fn default_alert_callback_timeout_ms() -> u64 {
    5_000
}

const fn default_max_recovery_attempts() -> u32 {
    3
}

const fn default_recovery_delay_ms() -> u64 {
    5_000
}

const fn default_alert_cooldown_secs() -> u64 {
    300
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: default_health_check_interval_secs(),
            security_check_interval_secs: default_security_check_interval_secs(),
            warning_response_ms: default_warning_response_ms(),
            critical_response_ms: default_critical_response_ms(),
            slow_query_ms: default_slow_query_ms(),
            slow_query_burst_threshold: default_slow_query_burst_threshold(),
            error_rate_threshold: default_error_rate_threshold(),
            min_error_sample: default_min_error_sample(),
            connection_failure_threshold: default_connection_failure_threshold(),
            security_window_secs: default_security_window_secs(),
            max_queries_per_second: default_max_queries_per_second(),
            history_capacity: default_history_capacity(),
            health_history_capacity: default_health_history_capacity(),
            alert_history_capacity: default_alert_history_capacity(),
            alert_callback_timeout_ms: default_alert_callback_timeout_ms(),
            max_recovery_attempts: default_max_recovery_attempts(),
            recovery_delay_ms: default_recovery_delay_ms(),
            alert_cooldown_secs: default_alert_cooldown_secs(),
            auto_recovery: true,
        }
    }
}

impl MonitorConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn security_check_interval(&self) -> Duration {
        Duration::from_secs(self.security_check_interval_secs)
    }

    pub fn warning_response(&self) -> Duration {
        Duration::from_millis(self.warning_response_ms)
    }

    pub fn critical_response(&self) -> Duration {
        Duration::from_millis(self.critical_response_ms)
    }

    pub fn slow_query(&self) -> Duration {
        Duration::from_millis(self.slow_query_ms)
    }

    pub fn security_window(&self) -> Duration {
        Duration::from_secs(self.security_window_secs)
    }

    pub fn alert_callback_timeout(&self) -> Duration {
        Duration::from_millis(self.alert_callback_timeout_ms)
    }

    pub fn recovery_delay(&self) -> Duration {
        Duration::from_millis(self.recovery_delay_ms)
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_secs(self.alert_cooldown_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}
