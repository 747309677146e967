//! Circuit breaker pattern for failure detection and recovery.
//!
//! Each named circuit counts consecutive backend failures. Once the failure
//! threshold is reached the circuit opens and rejects calls without running
//! them until a cool-down elapses. After the cool-down exactly one trial call
//! is admitted at a time; enough consecutive trial successes close the
//! circuit, and any trial failure reopens it with a fresh cool-down.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::domain::errors::DbError;
use crate::domain::models::CircuitBreakerConfig;

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally.
    Closed,
    /// Circuit is open, requests are blocked.
    Open,
    /// Circuit is testing if the backend has recovered.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// State change caused by recording an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Opened,
    Reopened,
    Closed,
}

/// Outcome of asking a circuit for admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Allowed,
    Trial,
    Rejected { retry_after: Duration },
}

/// Individual circuit breaker state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: String,
    state: CircuitState,
    consecutive_failures: u32,
    trial_successes: u32,
    trial_in_flight: bool,
    opened_at: Option<Instant>,
    state_changed_at: DateTime<Utc>,
    open_count: u32,
    rejected_calls: u64,
    last_error: Option<String>,
}

impl CircuitBreaker {
    /// Create a new, closed circuit breaker.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: CircuitState::Closed,
            consecutive_failures: 0,
            trial_successes: 0,
            trial_in_flight: false,
            opened_at: None,
            state_changed_at: Utc::now(),
            open_count: 0,
            rejected_calls: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    fn admit(&mut self, config: &CircuitBreakerConfig) -> Admission {
        match self.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let elapsed = self.opened_at.map_or(Duration::MAX, |t| t.elapsed());
                if elapsed >= config.cooldown() {
                    self.half_open();
                    self.trial_in_flight = true;
                    Admission::Trial
                } else {
                    self.rejected_calls += 1;
                    Admission::Rejected {
                        retry_after: config.cooldown().saturating_sub(elapsed),
                    }
                }
            }
            CircuitState::HalfOpen => {
                if self.trial_in_flight {
                    self.rejected_calls += 1;
                    Admission::Rejected {
                        retry_after: Duration::ZERO,
                    }
                } else {
                    self.trial_in_flight = true;
                    Admission::Trial
                }
            }
        }
    }

    fn record_success(&mut self, config: &CircuitBreakerConfig, trial: bool) -> Option<Transition> {
        if trial {
            self.trial_in_flight = false;
        }
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
                None
            }
            CircuitState::HalfOpen if trial => {
                self.trial_successes += 1;
                if self.trial_successes >= config.success_threshold.max(1) {
                    self.close();
                    Some(Transition::Closed)
                } else {
                    None
                }
            }
            // Outcomes of calls admitted before the circuit opened are ignored.
            CircuitState::HalfOpen | CircuitState::Open => None,
        }
    }

    fn record_failure(
        &mut self,
        config: &CircuitBreakerConfig,
        trial: bool,
        error: String,
    ) -> Option<Transition> {
        if trial {
            self.trial_in_flight = false;
        }
        self.last_error = Some(error);
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= config.failure_threshold.max(1) {
                    self.open();
                    Some(Transition::Opened)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen if trial => {
                self.open();
                Some(Transition::Reopened)
            }
            CircuitState::HalfOpen | CircuitState::Open => None,
        }
    }

    fn release_trial(&mut self) {
        self.trial_in_flight = false;
    }

    /// Open the circuit.
    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.state_changed_at = Utc::now();
        self.trial_successes = 0;
        self.trial_in_flight = false;
        self.open_count += 1;
    }

    /// Close the circuit.
    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.state_changed_at = Utc::now();
        self.trial_successes = 0;
        self.trial_in_flight = false;
        self.consecutive_failures = 0;
    }

    /// Transition to half-open.
    fn half_open(&mut self) {
        self.state = CircuitState::HalfOpen;
        self.state_changed_at = Utc::now();
        self.trial_successes = 0;
        self.trial_in_flight = false;
    }

    /// Manually reset the circuit.
    pub fn reset(&mut self) {
        self.close();
        self.open_count = 0;
        self.last_error = None;
    }

    fn stats(&self) -> CircuitStats {
        CircuitStats {
            name: self.name.clone(),
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            trial_successes: self.trial_successes,
            open_count: self.open_count,
            rejected_calls: self.rejected_calls,
            state_changed_at: self.state_changed_at,
            last_error: self.last_error.clone(),
        }
    }
}

/// Statistics for a circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitStats {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub trial_successes: u32,
    pub open_count: u32,
    pub rejected_calls: u64,
    pub state_changed_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// Admission to run one call under a circuit.
///
/// Report the outcome with `success`, `failure` or `neutral`. Dropping the
/// permit without reporting (a cancelled call) frees a held trial slot.
#[must_use = "a permit must be completed with the call outcome"]
pub struct CircuitPermit {
    circuit: Option<Arc<Mutex<CircuitBreaker>>>,
    config: CircuitBreakerConfig,
    trial: bool,
}

impl CircuitPermit {
    fn disabled(config: CircuitBreakerConfig) -> Self {
        Self {
            circuit: None,
            config,
            trial: false,
        }
    }

    /// Whether this permit is the half-open trial call.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) -> Option<Transition> {
        let circuit = self.circuit.take()?;
        let transition = circuit.lock().record_success(&self.config, self.trial);
        if transition == Some(Transition::Closed) {
            tracing::info!(circuit = %circuit.lock().name, "circuit closed after successful trial");
        }
        transition
    }

    pub fn failure(mut self, error: &DbError) -> Option<Transition> {
        let circuit = self.circuit.take()?;
        let mut breaker = circuit.lock();
        let transition = breaker.record_failure(&self.config, self.trial, error.to_string());
        if let Some(t) = transition {
            tracing::warn!(
                circuit = %breaker.name,
                transition = ?t,
                consecutive_failures = breaker.consecutive_failures,
                open_count = breaker.open_count,
                error = %error,
                "circuit opened"
            );
        }
        transition
    }

    /// The call ended in a way that says nothing about backend health.
    pub fn neutral(mut self) {
        if let Some(circuit) = self.circuit.take() {
            if self.trial {
                circuit.lock().release_trial();
            }
        }
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if let Some(circuit) = self.circuit.take() {
            if self.trial {
                circuit.lock().release_trial();
            }
        }
    }
}

/// Registry of named circuit breakers.
///
/// The registry lock is only held to look up or insert a circuit; each
/// circuit has its own lock, so unrelated circuits never contend.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    circuits: RwLock<HashMap<String, Arc<Mutex<CircuitBreaker>>>>,
}

impl CircuitBreakerRegistry {
    /// Create a new circuit breaker registry.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: RwLock::new(HashMap::new()),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    fn circuit(&self, name: &str) -> Arc<Mutex<CircuitBreaker>> {
        if let Some(existing) = self.circuits.read().get(name) {
            return existing.clone();
        }
        self.circuits
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CircuitBreaker::new(name))))
            .clone()
    }

    /// Ask circuit `name` to admit one call.
    ///
    /// Fails with `CircuitOpen` while the circuit is open and cooling down,
    /// or while another half-open trial is still in flight.
    pub fn admit(&self, name: &str) -> Result<CircuitPermit, DbError> {
        if !self.config.enabled {
            return Ok(CircuitPermit::disabled(self.config.clone()));
        }

        let circuit = self.circuit(name);
        let admission = circuit.lock().admit(&self.config);
        match admission {
            Admission::Allowed => Ok(CircuitPermit {
                circuit: Some(circuit),
                config: self.config.clone(),
                trial: false,
            }),
            Admission::Trial => {
                tracing::info!(circuit = name, "circuit half-open, admitting trial call");
                Ok(CircuitPermit {
                    circuit: Some(circuit),
                    config: self.config.clone(),
                    trial: true,
                })
            }
            Admission::Rejected { retry_after } => Err(DbError::CircuitOpen {
                circuit: name.to_string(),
                retry_after_ms: retry_after.as_millis() as u64,
            }),
        }
    }

    /// Get the state of a circuit.
    pub fn state(&self, name: &str) -> Option<CircuitState> {
        self.circuits.read().get(name).map(|c| c.lock().state())
    }

    /// Get statistics for all circuits, sorted by name.
    pub fn stats(&self) -> Vec<CircuitStats> {
        let mut stats: Vec<CircuitStats> = self
            .circuits
            .read()
            .values()
            .map(|c| c.lock().stats())
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Names of open circuits.
    pub fn open_circuits(&self) -> Vec<String> {
        self.circuits
            .read()
            .iter()
            .filter(|(_, c)| c.lock().state() == CircuitState::Open)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Manually reset a circuit.
    pub fn reset(&self, name: &str) {
        if let Some(circuit) = self.circuits.read().get(name) {
            circuit.lock().reset();
            tracing::info!(circuit = name, "circuit manually reset");
        }
    }

    /// Reset all circuits.
    pub fn reset_all(&self) {
        for circuit in self.circuits.read().values() {
            circuit.lock().reset();
        }
    }

    /// Get configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}
