//! Output formatting utilities for the CLI.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use serde::Serialize;
use std::env;

use crate::domain::models::{Config, HealthCheckResult, HealthStatus};
use crate::services::{CircuitState, ConnectionStats, QueryMetrics};

pub trait CommandOutput: Serialize {
    fn to_human(&self) -> String;
    fn to_json(&self) -> serde_json::Value;
}

pub fn output<T: CommandOutput>(result: &T, json_mode: bool) {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&result.to_json()).unwrap_or_default());
    } else {
        println!("{}", result.to_human());
    }
}

fn supports_color() -> bool {
    if env::var("NO_COLOR").is_ok() {
        return false;
    }
    !matches!(env::var("TERM").as_deref(), Ok("dumb"))
}

fn base_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            header
                .iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold)),
        );
    table
}

fn status_cell(status: HealthStatus) -> Cell {
    let cell = Cell::new(status.as_str());
    if !supports_color() {
        return cell;
    }
    match status {
        HealthStatus::Healthy => cell.fg(Color::Green),
        HealthStatus::Warning => cell.fg(Color::Yellow),
        HealthStatus::Critical => cell.fg(Color::Red),
        HealthStatus::Unknown => cell.fg(Color::DarkGrey),
    }
}

fn circuit_cell(state: CircuitState) -> Cell {
    let cell = Cell::new(state.as_str());
    if !supports_color() {
        return cell;
    }
    match state {
        CircuitState::Closed => cell.fg(Color::Green),
        CircuitState::HalfOpen => cell.fg(Color::Yellow),
        CircuitState::Open => cell.fg(Color::Red),
    }
}

/// Result of `dbweave health`.
#[derive(Debug, Serialize)]
pub struct HealthOutput {
    pub backend: String,
    pub result: HealthCheckResult,
}

impl CommandOutput for HealthOutput {
    fn to_human(&self) -> String {
        let mut table = base_table(&["Backend", "Status", "Response (ms)", "Message"]);
        table.add_row(vec![
            Cell::new(&self.backend),
            status_cell(self.result.status),
            Cell::new(format!("{:.1}", self.result.response_time_ms)),
            Cell::new(&self.result.message),
        ]);

        let mut details = base_table(&["Detail", "Value"]);
        for (key, value) in &self.result.details {
            details.add_row(vec![Cell::new(key), Cell::new(value.to_string())]);
        }
        format!("{table}\n{details}")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Result of `dbweave stats`.
#[derive(Debug, Serialize)]
pub struct StatsOutput {
    pub connections: ConnectionStats,
    pub queries: QueryMetrics,
}

impl CommandOutput for StatsOutput {
    fn to_human(&self) -> String {
        let mut pools = base_table(&[
            "Mode", "Min", "Max", "Idle", "In use", "Created", "Closed", "Acquired", "Exhausted",
            "Avg wait (ms)",
        ]);
        for m in &self.connections.pools.modes {
            pools.add_row(vec![
                Cell::new(m.mode.as_str()),
                Cell::new(m.min_size),
                Cell::new(m.max_size),
                Cell::new(m.idle),
                Cell::new(m.in_use),
                Cell::new(m.created),
                Cell::new(m.closed),
                Cell::new(m.acquisitions),
                Cell::new(m.exhausted),
                Cell::new(format!("{:.1}", m.avg_wait_ms)),
            ]);
        }

        let cache = &self.connections.cache;
        let mut cache_table = base_table(&["Cache", "Entries", "Hits", "Misses", "Hit rate", "Invalidations"]);
        cache_table.add_row(vec![
            Cell::new(if cache.enabled { "enabled" } else { "disabled" }),
            Cell::new(cache.entries),
            Cell::new(cache.hits),
            Cell::new(cache.misses),
            Cell::new(format!("{:.1}%", cache.hit_rate * 100.0)),
            Cell::new(cache.invalidations),
        ]);

        let mut circuits = base_table(&["Circuit", "State", "Failures", "Opened", "Rejected", "Last error"]);
        for c in &self.connections.circuits {
            circuits.add_row(vec![
                Cell::new(&c.name),
                circuit_cell(c.state),
                Cell::new(c.consecutive_failures),
                Cell::new(c.open_count),
                Cell::new(c.rejected_calls),
                Cell::new(c.last_error.as_deref().unwrap_or("-")),
            ]);
        }

        let q = &self.queries;
        let mut queries = base_table(&["Queries", "Success", "Errors", "Timeouts", "Avg (ms)", "p95 (ms)", "Slow"]);
        queries.add_row(vec![
            Cell::new(q.tracked),
            Cell::new(q.success),
            Cell::new(q.errors),
            Cell::new(q.timeouts),
            Cell::new(format!("{:.1}", q.avg_ms)),
            Cell::new(format!("{:.1}", q.p95_ms)),
            Cell::new(q.slow_queries),
        ]);

        format!(
            "Backend: {} (connected: {})\n{pools}\n{cache_table}\n{circuits}\n{queries}",
            self.connections.pools.backend, self.connections.pools.connected
        )
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Result of `dbweave config`.
#[derive(Debug, Serialize)]
pub struct ConfigOutput {
    pub config: Config,
}

impl CommandOutput for ConfigOutput {
    fn to_human(&self) -> String {
        serde_yaml::to_string(&self.config).unwrap_or_else(|e| format!("<unprintable config: {e}>"))
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or_default()
    }
}
